/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type for schedule compilation.
//!
//! Every variant carries the exact operands that failed so the engine can log
//! a useful message before halting. Participant tick faults are *not* here —
//! they are opaque `anyhow::Error`s reported through the per-chip callback
//! table and never stop the clock by themselves.

use thiserror::Error;

/// Why a schedule could not be compiled from the current registry.
///
/// A failed compilation is reported via `tracing::error!` and halts the
/// clock; it is never a panic. All three variants mean the registered
/// frequencies are too large or too disparate to represent.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The LCM of the participant frequencies overflowed `u64`.
    #[error("frequency LCM overflow computing lcm({a}, {b})")]
    FrequencyLcmOverflow { a: u64, b: u64 },

    /// A participant's activation interval (LCM frequency divided by its own
    /// frequency) does not fit in a 32-bit counter threshold.
    #[error(
        "counter threshold {threshold} for a {frequency_hz}Hz participant does not fit in 32 bits"
    )]
    ThresholdOverflow { frequency_hz: u32, threshold: u64 },

    /// The LCM of the counter thresholds (the schedule period, in base ticks)
    /// overflowed `u32`.
    #[error("schedule period LCM overflow computing lcm({a}, {b})")]
    PeriodLcmOverflow { a: u64, b: u64 },
}
