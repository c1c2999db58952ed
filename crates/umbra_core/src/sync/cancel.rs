//! # Cooperative Cancellation
//!
//! A [`CancellationSource`] owns the right to cancel; any number of
//! [`CancellationToken`] clones observe it. Sources can be derived from a
//! parent token, so cancelling a session cancels every world and loop below
//! it.
//!
//! ```text
//!   CancelSlot (session)  ──replace()──►  new source, old one cancelled
//!        │
//!        └── world source (child)
//!               ├── realtime worker token
//!               ├── slow worker token
//!               └── explosives worker token
//! ```
//!
//! Loops check [`CancellationToken::is_cancelled`] between cycles and sleep
//! with [`CancellationToken::sleep`], which wakes immediately on cancel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by [`CancellationToken::check`] once cancelled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

struct Shared {
    cancelled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
    children: Mutex<Vec<Weak<Shared>>>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            // Sleepers check the flag under this lock.
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Self::new();
        {
            let mut children = self.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        if self.cancelled.load(Ordering::SeqCst) {
            child.cancel();
        }
        child
    }
}

/// Observer side of a cancellation source.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self { shared: Shared::new() }
    }

    /// True once the source (or any ancestor) was cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token was cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` or until cancelled.
    ///
    /// Returns true if the full duration elapsed, false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.shared.mutex.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self.shared.condvar.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_cancelled();
            }
        }
    }
}

/// Owner side: the only handle that can cancel.
pub struct CancellationSource {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    /// Creates an independent source.
    #[must_use]
    pub fn new() -> Self {
        Self { shared: Shared::new() }
    }

    /// Creates a source cancelled whenever `parent` is.
    #[must_use]
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            shared: parent.shared.child(),
        }
    }

    /// Returns an observer token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancels this source and every source derived from it.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }
}

/// A swappable source: `replace` cancels whatever is running and installs a
/// fresh source for the next run.
#[derive(Debug, Default)]
pub struct CancelSlot {
    current: Mutex<CancellationSource>,
}

impl CancelSlot {
    /// Creates a slot holding a fresh source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the currently installed source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.current.lock().token()
    }

    /// Cancels the installed source and installs a fresh one.
    ///
    /// Holders of the old token observe cancellation; tokens taken after
    /// this call are live.
    pub fn replace(&self) {
        let old = std::mem::take(&mut *self.current.lock());
        old.cancel();
    }

    /// Cancels the installed source without replacing it.
    pub fn cancel(&self) {
        self.current.lock().cancel();
    }
}
