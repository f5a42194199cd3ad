//! The master clock: registry, execution engine, linked-stop policy and the
//! public control surface.
//!
//! [`MasterClock`] drives a heterogeneous set of clocked participants — CPU
//! cores, timers, serial ports, A/D converters — forward in virtual time, so
//! that over any long interval each participant receives approximately
//! `frequency × elapsed_seconds` activations. Time is counted in picoseconds
//! and advances by integer addition only; the clock never sleeps or paces
//! against wall time.
//!
//! ```text
//! add/remove/enable ──► registry ──► schedule::compile ──► step list
//!                          ▲                                   │
//!                          │            worker thread          ▼
//! callbacks ◄── linked stop ◄── tick outcomes ◄── run loop over steps
//! ```
//!
//! The engine runs on a dedicated worker thread ([`MasterClock::start`]) or
//! on the caller ([`MasterClock::run`]). Registry mutations and control-flag
//! writes may come from any thread; the engine picks them up at step
//! boundaries — a reschedule request rebuilds the step list at the next safe
//! point, never mid-step. When the engine halts, the step list is rotated so
//! that the step after the one that caused termination is at position 0; a
//! later restart resumes mid-period instead of replaying it.

pub mod error;
mod schedule;

pub use error::ScheduleError;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::clockable::{ClockCallback, Clockable, Tick};
use crate::config::ClockPrefs;
use crate::timebase;
use schedule::ExecutionStep;

// ── Registry entry ────────────────────────────────────────────────────────────

/// One registered participant, with the scheduling state the clock keeps for
/// it. Entries are shared between the registry and the compiled step list;
/// the flags crossed by both the worker and mutator threads are atomics.
pub(crate) struct Entry {
    pub(crate) clockable: Arc<dyn Clockable>,
    /// Index into the callback handler table; `None` means no callback.
    callback_chip: Option<usize>,
    /// Cached once at registration: does the linked-stop policy apply.
    is_cpu: bool,
    /// Included in the frequency LCM unconditionally; imprecise entries may
    /// drift up to ~25% instead.
    pub(crate) is_precise: bool,
    enabled: AtomicBool,
    /// Cached result of the last frequency read being zero.
    pub(crate) frequency_zero: AtomicBool,
    /// Base ticks between two activations; 0 until first compiled.
    pub(crate) counter_threshold: AtomicU32,
    /// Fractional progress toward the next activation, rescaled when the
    /// threshold changes so phase is approximately conserved.
    pub(crate) counter_value: AtomicU32,
}

impl Entry {
    fn new(
        clockable: Arc<dyn Clockable>,
        callback_chip: Option<usize>,
        enabled: bool,
        is_precise: bool,
    ) -> Self {
        let is_cpu = clockable.is_cpu();
        Self {
            clockable,
            callback_chip,
            is_cpu,
            is_precise,
            enabled: AtomicBool::new(enabled),
            frequency_zero: AtomicBool::new(false),
            counter_threshold: AtomicU32::new(0),
            counter_value: AtomicU32::new(0),
        }
    }
}

// ── Shared clock state ────────────────────────────────────────────────────────

struct ClockInner {
    /// Registered participants, in insertion order. Mutators hold the lock
    /// briefly; the engine and compiler work from snapshot clones.
    entries: Mutex<Vec<Arc<Entry>>>,
    /// Chip-indexed callback table. Installed before start; read-only while
    /// the engine runs.
    handlers: Mutex<Vec<Arc<dyn ClockCallback>>>,
    /// Compiled step list, kept here between runs so the post-halt rotation
    /// survives a stop/start cycle.
    steps: Mutex<Vec<ExecutionStep>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    tick_ps: AtomicI64,
    elapsed_ps: AtomicI64,
    running: AtomicBool,
    reschedule_requested: AtomicBool,
    sync_play: AtomicBool,
    period_warn_limit: u32,
}

/// Deterministic multi-rate tick scheduler for a multi-chip device.
///
/// Cheap to clone; clones share the same clock. Participants that need to
/// stop the clock or request a reschedule from inside a tick hold a clone.
#[derive(Clone)]
pub struct MasterClock {
    inner: Arc<ClockInner>,
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock {
    /// A clock with default preferences (`sync_play` off, period warning at
    /// 20 000 base ticks).
    pub fn new() -> Self {
        Self::with_prefs(&ClockPrefs::default())
    }

    /// A clock configured from loaded preferences.
    pub fn with_prefs(prefs: &ClockPrefs) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                entries: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
                steps: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
                tick_ps: AtomicI64::new(0),
                elapsed_ps: AtomicI64::new(0),
                running: AtomicBool::new(false),
                reschedule_requested: AtomicBool::new(false),
                sync_play: AtomicBool::new(prefs.sync_play),
                period_warn_limit: prefs.period_warn_limit,
            }),
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// Register a participant.
    ///
    /// Identity-deduplicated: adding a participant that is already registered
    /// re-enables the existing entry instead of duplicating it. Always
    /// requests a reschedule.
    pub fn add(
        &self,
        clockable: Arc<dyn Clockable>,
        callback_chip: Option<usize>,
        enabled: bool,
        precise: bool,
    ) {
        {
            let mut entries = self.entries();
            if let Some(existing) = entries
                .iter()
                .find(|e| Arc::ptr_eq(&e.clockable, &clockable))
            {
                existing.enabled.store(true, Ordering::Relaxed);
            } else {
                debug!(
                    participant = clockable.name(),
                    frequency_hz = clockable.frequency_hz(),
                    enabled,
                    precise,
                    "registering participant"
                );
                entries.push(Arc::new(Entry::new(clockable, callback_chip, enabled, precise)));
            }
        }
        self.request_reschedule();
    }

    /// [`add`](Self::add) with the usual flags: enabled, precise, no callback.
    pub fn add_simple(&self, clockable: Arc<dyn Clockable>) {
        self.add(clockable, None, true, true);
    }

    /// Remove a participant by identity. Absence is not an error. Requests a
    /// reschedule either way.
    pub fn remove(&self, clockable: &Arc<dyn Clockable>) {
        {
            let mut entries = self.entries();
            if let Some(index) = entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.clockable, clockable))
            {
                let removed = entries.remove(index);
                debug!(participant = removed.clockable.name(), "removing participant");
            }
        }
        self.request_reschedule();
    }

    /// Re-enable a participant. If it carries the CPU capability, every entry
    /// on its chip is re-enabled with it.
    pub fn enable(&self, clockable: &Arc<dyn Clockable>) {
        let registry = self.snapshot();
        let handlers = self.handlers();
        if let Some(entry) = registry
            .iter()
            .find(|e| Arc::ptr_eq(&e.clockable, clockable))
        {
            entry.enabled.store(true, Ordering::Relaxed);
            if entry.is_cpu {
                Self::set_linked_enabled(&registry, &handlers, entry.clockable.chip(), true);
            }
        }
    }

    // ── Control surface ───────────────────────────────────────────────────────

    /// Ask the engine to recompile the schedule at the next step boundary.
    /// Safe from any thread at any time.
    pub fn request_reschedule(&self) {
        self.inner.reschedule_requested.store(true, Ordering::Release);
    }

    /// Install the chip-indexed callback table. Must be called before
    /// [`start`](Self::start); the engine reads the table once per run.
    pub fn set_callback_handlers(&self, handlers: Vec<Arc<dyn ClockCallback>>) {
        *self
            .inner
            .handlers
            .lock()
            .expect("handler table poisoned") = handlers;
    }

    /// Toggle cross-chip cascading stop.
    pub fn set_sync_play(&self, sync_play: bool) {
        self.inner.sync_play.store(sync_play, Ordering::Relaxed);
    }

    /// Start the clock on a dedicated worker thread. Idempotent; a no-op if
    /// the clock is already running.
    pub fn start(&self) {
        if !self.claim_running() {
            return;
        }
        let clock = self.clone();
        match thread::Builder::new()
            .name("masterclock".into())
            .spawn(move || clock.run_loop())
        {
            Ok(handle) => {
                *self.inner.worker.lock().expect("worker slot poisoned") = Some(handle);
            }
            Err(err) => {
                error!(error = %err, "failed to spawn clock worker");
                self.inner.running.store(false, Ordering::Release);
            }
        }
    }

    /// Run the clock synchronously on the calling thread, returning when it
    /// halts. A no-op if the clock is already running.
    pub fn run(&self) {
        if !self.claim_running() {
            return;
        }
        self.run_loop();
    }

    /// Cooperative stop: the engine exits after finishing the current step.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Total elapsed virtual time in picoseconds. Monotone non-decreasing
    /// except for [`reset_elapsed`](Self::reset_elapsed); overflows `i64`
    /// after roughly 100 emulated days.
    pub fn elapsed_ps(&self) -> i64 {
        self.inner.elapsed_ps.load(Ordering::Relaxed)
    }

    /// Zero the elapsed-time counter. Does not stop the clock.
    pub fn reset_elapsed(&self) {
        self.inner.elapsed_ps.store(0, Ordering::Relaxed);
    }

    /// Elapsed virtual time as fixed-width milliseconds,
    /// e.g. `"0042.000153000ms"`.
    pub fn formatted_elapsed_ms(&self) -> String {
        timebase::format_elapsed_ms(self.elapsed_ps())
    }

    /// Duration of one base tick in picoseconds, as of the last compiled
    /// schedule. Zero before the first compilation.
    pub fn tick_ps(&self) -> i64 {
        self.inner.tick_ps.load(Ordering::Relaxed)
    }

    // ── Engine ────────────────────────────────────────────────────────────────

    /// Claim the running flag. Returns `false` when the clock is already
    /// running (including a resume issued from inside a tick on the worker
    /// itself, where the loop is still on the stack and picks the flag back
    /// up at the next boundary).
    fn claim_running(&self) -> bool {
        let mut worker = self.inner.worker.lock().expect("worker slot poisoned");
        if self.inner.running.load(Ordering::Acquire) {
            return false;
        }
        if let Some(previous) = worker.take() {
            if previous.thread().id() == thread::current().id() {
                *worker = Some(previous);
                self.inner.running.store(true, Ordering::Release);
                return false;
            }
            // Wait for the previous worker's epilogue so the rotated step
            // list is published before the next run takes it.
            let _ = previous.join();
        }
        self.inner.running.store(true, Ordering::Release);
        true
    }

    fn run_loop(&self) {
        let inner = &*self.inner;
        let handlers = self.handlers();
        let mut steps = std::mem::take(&mut *inner.steps.lock().expect("step list poisoned"));
        let mut last_step = 0usize;
        let mut pending_disable: Vec<Arc<Entry>> = Vec::new();

        info!("clock running");
        while inner.running.load(Ordering::Acquire) {
            if inner.reschedule_requested.swap(false, Ordering::AcqRel) {
                let registry = self.snapshot();
                match schedule::compile(&registry, inner.period_warn_limit) {
                    Ok(compiled) => {
                        inner.tick_ps.store(compiled.tick_ps, Ordering::Relaxed);
                        steps = compiled.steps;
                    }
                    Err(err) => {
                        error!(error = %err, "schedule compilation failed; stopping clock");
                        inner.running.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            if steps.is_empty() {
                info!("no participant is due on any step; stopping clock");
                inner.running.store(false, Ordering::Release);
                break;
            }

            for index in 0..steps.len() {
                last_step = index;
                let step = &steps[index];

                for entry in &step.entries {
                    if !entry.enabled.load(Ordering::Relaxed)
                        || entry.frequency_zero.load(Ordering::Relaxed)
                    {
                        continue;
                    }
                    match entry.clockable.on_clock_tick() {
                        Ok(Tick::Continue) => {}
                        Ok(Tick::Exit(reason)) => {
                            debug!(
                                participant = entry.clockable.name(),
                                reason = %reason,
                                "participant exited"
                            );
                            pending_disable.push(Arc::clone(entry));
                            Self::notify_exit(&handlers, entry, &reason);
                        }
                        Err(fault) => {
                            warn!(
                                participant = entry.clockable.name(),
                                error = %fault,
                                "participant tick faulted"
                            );
                            pending_disable.push(Arc::clone(entry));
                            Self::notify_fault(&handlers, entry, &fault);
                        }
                    }
                }

                if !pending_disable.is_empty() {
                    let registry = self.snapshot();
                    let sync_play = inner.sync_play.load(Ordering::Relaxed);
                    for entry in pending_disable.drain(..) {
                        Self::disable_entry(&registry, &handlers, sync_play, &entry);
                    }
                    // Re-read the registry: a participant added during the
                    // callbacks above counts as still-alive.
                    if self
                        .snapshot()
                        .iter()
                        .all(|e| !e.enabled.load(Ordering::Relaxed))
                    {
                        info!("all participants disabled; stopping clock");
                        inner.running.store(false, Ordering::Release);
                        break;
                    }
                }

                inner.elapsed_ps.fetch_add(step.duration_ps, Ordering::Relaxed);

                // Reschedule requests and cooperative stops are honored
                // between steps, never mid-step.
                if inner.reschedule_requested.load(Ordering::Acquire)
                    || !inner.running.load(Ordering::Acquire)
                {
                    break;
                }
            }
        }

        // Rotate so a later restart resumes with the next-due step instead of
        // replaying the period from the top.
        if !steps.is_empty() {
            let len = steps.len();
            steps.rotate_left((last_step + 1) % len);
        }
        *inner.steps.lock().expect("step list poisoned") = steps;
        debug!(
            elapsed = %timebase::format_elapsed_ms(inner.elapsed_ps.load(Ordering::Relaxed)),
            "clock stopped"
        );
    }

    // ── Linked-stop policy ────────────────────────────────────────────────────

    /// Disable `entry`. If it carries the CPU capability, also disable every
    /// entry on its chip, and under sync play every other enabled CPU entry
    /// and *its* chip in turn — collapsing the whole registry to disabled in
    /// one pass.
    fn disable_entry(
        registry: &[Arc<Entry>],
        handlers: &[Arc<dyn ClockCallback>],
        sync_play: bool,
        entry: &Entry,
    ) {
        debug!(participant = entry.clockable.name(), "disabling participant");
        entry.enabled.store(false, Ordering::Relaxed);
        if !entry.is_cpu {
            return;
        }
        Self::set_linked_enabled(registry, handlers, entry.clockable.chip(), false);
        if sync_play {
            for candidate in registry {
                if candidate.is_cpu && candidate.enabled.load(Ordering::Relaxed) {
                    Self::notify_exit(
                        handlers,
                        candidate,
                        &format!("Sync stop due to {}", entry.clockable.name()),
                    );
                    candidate.enabled.store(false, Ordering::Relaxed);
                    Self::set_linked_enabled(
                        registry,
                        handlers,
                        candidate.clockable.chip(),
                        false,
                    );
                }
            }
        }
    }

    /// Flip every entry on `chip` to `enabled`. Entries being disabled that
    /// have a callback handler are told via `on_normal_exit`; enabling is
    /// silent.
    fn set_linked_enabled(
        registry: &[Arc<Entry>],
        handlers: &[Arc<dyn ClockCallback>],
        chip: usize,
        enabled: bool,
    ) {
        for candidate in registry {
            if candidate.enabled.load(Ordering::Relaxed) != enabled
                && candidate.clockable.chip() == chip
            {
                if !enabled {
                    Self::notify_exit(
                        handlers,
                        candidate,
                        &format!("Sync stop due to chip {chip} stopping."),
                    );
                }
                debug!(
                    participant = candidate.clockable.name(),
                    enabled, "linked state change"
                );
                candidate.enabled.store(enabled, Ordering::Relaxed);
            }
        }
    }

    fn notify_exit(handlers: &[Arc<dyn ClockCallback>], entry: &Entry, reason: &str) {
        if let Some(chip) = entry.callback_chip {
            if let Some(handler) = handlers.get(chip) {
                handler.on_normal_exit(reason);
            }
        }
    }

    fn notify_fault(handlers: &[Arc<dyn ClockCallback>], entry: &Entry, fault: &anyhow::Error) {
        if let Some(chip) = entry.callback_chip {
            if let Some(handler) = handlers.get(chip) {
                handler.on_exception(fault);
            }
        }
    }

    // ── Shared-state access ───────────────────────────────────────────────────

    fn entries(&self) -> MutexGuard<'_, Vec<Arc<Entry>>> {
        self.inner.entries.lock().expect("clock registry poisoned")
    }

    fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries().clone()
    }

    fn handlers(&self) -> Vec<Arc<dyn ClockCallback>> {
        self.inner
            .handlers
            .lock()
            .expect("handler table poisoned")
            .clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
