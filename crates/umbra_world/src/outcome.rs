//! # Cycle Outcomes
//!
//! Refresh cycles report a [`CycleOutcome`] instead of unwinding. Raid-end
//! detection is an explicit bounded-retry state ([`RaidCheck`]): a single
//! failed revalidation proves nothing, `attempts` consecutive ones end the
//! world.

use crate::error::{MirrorError, MirrorResult, Severity};

/// What a refresh cycle reports to its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Cycle completed (possibly with per-entity failures already logged).
    Continue,
    /// Cycle failed; the loop keeps running.
    Recoverable(MirrorError),
    /// The enclosing world must be torn down.
    Fatal(MirrorError),
}

impl CycleOutcome {
    /// True for [`CycleOutcome::Fatal`].
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<MirrorResult<()>> for CycleOutcome {
    fn from(result: MirrorResult<()>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(e) => match e.severity() {
                Severity::Recoverable => Self::Recoverable(e),
                Severity::Fatal => Self::Fatal(e),
            },
        }
    }
}

/// Result of recording one revalidation probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// The world answered; the failure streak is reset.
    Alive,
    /// Not confirmed yet; retry after a short pause.
    Pending {
        /// Consecutive failures so far.
        failures: u32,
    },
    /// Budget exhausted: the world is gone.
    Ended,
}

/// Bounded retry state for raid-end detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RaidCheck {
    attempts: u32,
    failures: u32,
}

impl RaidCheck {
    /// Budget of `attempts` consecutive failures (at least one).
    #[must_use]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            failures: 0,
        }
    }

    /// Records one probe result.
    pub fn record(&mut self, alive: bool) -> Verification {
        if alive {
            self.failures = 0;
            return Verification::Alive;
        }
        self.failures += 1;
        if self.failures >= self.attempts {
            Verification::Ended
        } else {
            Verification::Pending {
                failures: self.failures,
            }
        }
    }

    /// Consecutive failures recorded.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}
