//! # Refresh Scheduler
//!
//! Every refresh class runs on its own OS thread with its own cadence and
//! its own cancellation token derived from the world's.
//!
//! ## Cycle contract
//!
//! - The body returns a [`CycleOutcome`]; it never has to unwind.
//! - `Recoverable` is logged and counted; the loop keeps its cadence.
//! - `Fatal` (or a panic, which is caught) stops the loop and is handed to
//!   the fault hook, which tears down the enclosing world.
//! - Cancellation is checked before every cycle and wakes the sleep.
//!
//! ## Sleep modes
//!
//! | Mode      | Pause after a cycle             |
//! |-----------|---------------------------------|
//! | `Fixed`   | `interval`                      |
//! | `Dynamic` | `interval - cycle duration`     |

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, trace};
use umbra_core::{CancellationSource, CancellationToken};

use crate::error::{MirrorError, MirrorResult};
use crate::outcome::CycleOutcome;

/// How a worker paces itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepMode {
    /// Sleep the full interval after every cycle.
    Fixed,
    /// Sleep whatever is left of the interval.
    Dynamic,
}

/// Cycle timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerStats {
    /// Minimum cycle duration observed.
    pub min_cycle_us: u64,
    /// Maximum cycle duration observed.
    pub max_cycle_us: u64,
    /// Average cycle duration (rolling).
    pub avg_cycle_us: u64,
    /// Cycles that took longer than the interval.
    pub late_cycles: u64,
    /// Total cycles run.
    pub total_cycles: u64,
    /// Cycles that reported a recoverable failure.
    pub failed_cycles: u64,
}

impl WorkerStats {
    fn new(interval: Duration) -> Self {
        Self {
            min_cycle_us: u64::MAX,
            max_cycle_us: 0,
            avg_cycle_us: interval.as_micros() as u64,
            late_cycles: 0,
            total_cycles: 0,
            failed_cycles: 0,
        }
    }

    fn record(&mut self, duration: Duration, interval: Duration) {
        let duration_us = duration.as_micros() as u64;
        self.total_cycles += 1;
        self.min_cycle_us = self.min_cycle_us.min(duration_us);
        self.max_cycle_us = self.max_cycle_us.max(duration_us);
        self.avg_cycle_us = (self.avg_cycle_us * 15 + duration_us) / 16;
        if duration > interval {
            self.late_cycles += 1;
        }
    }
}

/// Called once with the error that stopped a worker.
pub type FaultHook = Arc<dyn Fn(MirrorError) + Send + Sync>;

/// Static description of a worker.
#[derive(Clone, Copy, Debug)]
pub struct WorkerSpec {
    /// Thread and log name.
    pub name: &'static str,
    /// Target cycle interval.
    pub interval: Duration,
    /// Pacing.
    pub mode: SleepMode,
}

/// A running refresh loop. Dropping it cancels and joins the thread.
pub struct Worker {
    name: &'static str,
    source: CancellationSource,
    stats: Arc<Mutex<WorkerStats>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Spawns `body` on a dedicated thread.
    ///
    /// The worker's token is a child of `parent`; cancelling the parent
    /// stops the worker within one cycle.
    ///
    /// # Errors
    ///
    /// `Spawn` if the OS refuses the thread.
    pub fn spawn<F>(spec: WorkerSpec, parent: &CancellationToken, on_fault: FaultHook, mut body: F) -> MirrorResult<Self>
    where
        F: FnMut(&CancellationToken) -> CycleOutcome + Send + 'static,
    {
        let source = CancellationSource::child_of(parent);
        let token = source.token();
        let stats = Arc::new(Mutex::new(WorkerStats::new(spec.interval)));
        let thread_stats = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("umbra-{}", spec.name))
            .spawn(move || {
                debug!(worker = spec.name, interval_ms = spec.interval.as_millis() as u64, "worker started");
                while !token.is_cancelled() {
                    let start = Instant::now();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&token)))
                        .unwrap_or_else(|payload| CycleOutcome::Fatal(MirrorError::Panicked(panic_message(&*payload))));
                    let elapsed = start.elapsed();

                    {
                        let mut stats = thread_stats.lock();
                        stats.record(elapsed, spec.interval);
                        if matches!(outcome, CycleOutcome::Recoverable(_)) {
                            stats.failed_cycles += 1;
                        }
                    }

                    match outcome {
                        CycleOutcome::Continue => {}
                        CycleOutcome::Recoverable(e) => {
                            trace!(worker = spec.name, "cycle failed: {e}");
                        }
                        CycleOutcome::Fatal(e) => {
                            if e.is_graceful() {
                                debug!(worker = spec.name, "worker stopping: {e}");
                            } else {
                                error!(worker = spec.name, "worker faulted: {e}");
                            }
                            on_fault(e);
                            break;
                        }
                    }

                    let pause = match spec.mode {
                        SleepMode::Fixed => spec.interval,
                        SleepMode::Dynamic => spec.interval.saturating_sub(elapsed),
                    };
                    if !pause.is_zero() && !token.sleep(pause) {
                        break;
                    }
                }
                debug!(worker = spec.name, "worker stopped");
            })
            .map_err(|e| MirrorError::Spawn {
                name: spec.name,
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: spec.name,
            source,
            stats,
            handle: Some(handle),
        })
    }

    /// Worker name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Snapshot of the timing statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock()
    }

    /// True until the loop exits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the loop and waits for the thread to exit.
    pub fn stop(&mut self) {
        self.source.cancel();
        if let Some(handle) = self.handle.take() {
            // Panics are caught inside the loop; a join error cannot carry one.
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
