/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Schedule compilation: from the participant registry to a compact periodic
//! step list.
//!
//! The compiler folds every active frequency into a least common multiple,
//! derives one counter threshold per participant (`lcm / frequency` = how
//! many base ticks between two activations), then walks one full period
//! (the LCM of the thresholds) and emits one [`ExecutionStep`] per base tick
//! on which at least one participant is due. Base ticks on which nobody runs
//! are folded into the preceding step's duration, so every emitted step is
//! productive and the step durations still sum to the full period.
//!
//! Imprecise participants (low-baud serial and the like) tolerate up to ~25%
//! drift: they are left out of the LCM unless the precise LCM is so low that
//! approximating them from it would exceed that tolerance
//! (`lcm_precise < 4 × max_imprecise_frequency`), in which case they are
//! folded in like everyone else.
//!
//! Participants whose frequency reads zero are cached as silent and excluded
//! from the step list entirely; a registry with no positive frequency
//! compiles to an empty schedule, which the engine treats as "nothing to
//! run" and halts.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::ScheduleError;
use super::Entry;
use crate::timebase::{self, math};

/// One position in the compiled periodic schedule: the participants due on
/// this base tick, and how much virtual time the step covers (one base tick
/// plus any empty ticks folded in behind it).
pub(crate) struct ExecutionStep {
    pub(crate) duration_ps: i64,
    pub(crate) entries: Vec<Arc<Entry>>,
}

/// Output of one compilation: the base tick quantum and the circular step
/// list. Step durations sum to `period_steps × tick_ps`.
pub(crate) struct Schedule {
    pub(crate) tick_ps: i64,
    pub(crate) steps: Vec<ExecutionStep>,
}

/// Compile a schedule from a registry snapshot.
///
/// Reads each participant's frequency exactly once, refreshes the cached
/// silent flags, rescales counter values so phase is approximately conserved
/// when a threshold changes, and emits a `warn!` when the period exceeds
/// `period_warn_limit` base ticks.
///
/// # Errors
/// [`ScheduleError`] when the registered frequencies are too large or too
/// disparate for the LCM or a threshold to be represented.
pub(crate) fn compile(
    entries: &[Arc<Entry>],
    period_warn_limit: u32,
) -> Result<Schedule, ScheduleError> {
    // ── Frequency snapshot ────────────────────────────────────────────────────
    let freqs: Vec<u32> = entries.iter().map(|e| e.clockable.frequency_hz()).collect();

    // ── LCM over precise participants ─────────────────────────────────────────
    let mut lcm_frequency: u64 = 1;
    let mut max_imprecise: u32 = 0;

    for (entry, &hz) in entries.iter().zip(&freqs) {
        if hz > 0 {
            if entry.is_precise {
                lcm_frequency = math::lcm_u64(lcm_frequency, u64::from(hz))
                    .map_err(|e| ScheduleError::FrequencyLcmOverflow { a: e.a, b: e.b })?;
            } else {
                max_imprecise = max_imprecise.max(hz);
            }
            entry.frequency_zero.store(false, Ordering::Relaxed);
        } else {
            entry.frequency_zero.store(true, Ordering::Relaxed);
        }
    }

    // Imprecise participants accept ~25% drift; only fold them in when the
    // precise LCM is too low to approximate them within that tolerance.
    if lcm_frequency < u64::from(max_imprecise) << 2 {
        for (entry, &hz) in entries.iter().zip(&freqs) {
            if !entry.is_precise && hz > 0 {
                lcm_frequency = math::lcm_u64(lcm_frequency, u64::from(hz))
                    .map_err(|e| ScheduleError::FrequencyLcmOverflow { a: e.a, b: e.b })?;
            }
        }
    }

    // ── Per-participant thresholds and the period length ──────────────────────
    let mut period_steps: u32 = 1;
    for (entry, &hz) in entries.iter().zip(&freqs) {
        if hz == 0 {
            continue;
        }
        let wide = lcm_frequency / u64::from(hz);
        let new_threshold = u32::try_from(wide).map_err(|_| ScheduleError::ThresholdOverflow {
            frequency_hz: hz,
            threshold: wide,
        })?;
        // An excluded imprecise frequency is at most lcm/4, so the truncated
        // quotient is never zero.
        debug_assert!(new_threshold >= 1);

        let old_threshold = entry.counter_threshold.load(Ordering::Relaxed);
        if old_threshold != 0 {
            let rescaled = u64::from(entry.counter_value.load(Ordering::Relaxed))
                * u64::from(new_threshold)
                / u64::from(old_threshold);
            entry.counter_value.store(rescaled as u32, Ordering::Relaxed);
        }
        entry.counter_threshold.store(new_threshold, Ordering::Relaxed);

        debug!(
            participant = entry.clockable.name(),
            frequency_hz = hz,
            threshold = new_threshold,
            "participant threshold"
        );

        period_steps = math::lcm_u32(period_steps, new_threshold)
            .map_err(|e| ScheduleError::PeriodLcmOverflow { a: e.a, b: e.b })?;
    }

    if period_steps > period_warn_limit {
        warn!(
            period_steps,
            limit = period_warn_limit,
            "schedule period is very long because frequencies are very different; \
             some participants will be imprecise"
        );
    }

    // ── Base tick quantum ─────────────────────────────────────────────────────
    let tick_ps = (timebase::PS_PER_SEC as u64 / lcm_frequency) as i64;
    if tick_ps == 0 {
        warn!(
            lcm_frequency_hz = lcm_frequency,
            "combined frequencies exceed 1THz; base tick truncates to zero and \
             virtual time will not advance"
        );
    }

    // ── Step emission ─────────────────────────────────────────────────────────
    let active: Vec<(Arc<Entry>, u32)> = entries
        .iter()
        .zip(&freqs)
        .filter(|(_, &hz)| hz > 0)
        .map(|(e, _)| (Arc::clone(e), e.counter_threshold.load(Ordering::Relaxed)))
        .collect();

    let mut steps: Vec<ExecutionStep> = Vec::new();
    for k in 0..period_steps {
        let due: Vec<Arc<Entry>> = active
            .iter()
            .filter(|(_, threshold)| k % threshold == 0)
            .map(|(entry, _)| Arc::clone(entry))
            .collect();
        if due.is_empty() {
            // Nobody runs on this base tick; extend the previous step instead
            // of emitting an empty one. k = 0 triggers every active entry, so
            // a predecessor always exists here.
            if let Some(prev) = steps.last_mut() {
                prev.duration_ps += tick_ps;
            }
        } else {
            steps.push(ExecutionStep {
                duration_ps: tick_ps,
                entries: due,
            });
        }
    }

    info!(
        lcm_frequency_hz = lcm_frequency,
        tick_ps,
        period_steps,
        step_count = steps.len(),
        "schedule compiled"
    );

    Ok(Schedule { tick_ps, steps })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
