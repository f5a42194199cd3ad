/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! masterclock – deterministic multi-rate tick scheduler for multi-chip
//! device emulation.
//!
//! Each registered participant advertises a nominal frequency in hertz; the
//! clock compiles the set into a compact periodic schedule (built on the
//! least common multiple of the frequencies) and drives everyone forward in
//! virtual time at picosecond resolution. Participants can be added, removed,
//! retuned and re-enabled while the clock runs.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── clockable   – participant capability traits (Clockable, ClockCallback)
//! ├── clock/      – registry, schedule compiler, execution engine, linked stop
//! ├── timebase/   – picosecond units, GCD/LCM helpers
//! └── config/     – YAML clock preferences
//! ```

pub mod clock;
pub mod clockable;
pub mod config;
pub mod timebase;

pub use clock::{MasterClock, ScheduleError};
pub use clockable::{ClockCallback, Clockable, Tick, TickResult};
pub use config::ClockPrefs;
