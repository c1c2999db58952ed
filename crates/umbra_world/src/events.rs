//! # Lifecycle Events
//!
//! Publish/subscribe fan-out of lifecycle transitions.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Lifecycle   │ ──▶ │   EventBus   │ ──▶ │  bounded rx  │ ──▶ consumer
//! │   thread     │     │  (try_send)  │ ──▶ │  bounded rx  │ ──▶ consumer
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Publishing never blocks the lifecycle thread: a subscriber whose buffer
//! is full misses the event (counted in [`EventStats::dropped`]) and a
//! subscriber whose receiver was dropped is unsubscribed.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{trace, warn};
use umbra_memory::ProcessId;

use crate::session::SessionState;

/// A lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new target process was found and its module resolved.
    ProcessStarting {
        /// Process id.
        pid: ProcessId,
    },
    /// The session is attached to a new target process.
    ProcessStarted {
        /// Process id.
        pid: ProcessId,
    },
    /// The target process is gone.
    ProcessStopped {
        /// Process id.
        pid: ProcessId,
    },
    /// A world instance was created and its loops started.
    RaidStarted {
        /// Map identifier.
        map_id: String,
    },
    /// The world instance was torn down.
    RaidStopped {
        /// Map identifier.
        map_id: String,
    },
    /// The session state machine moved.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
}

/// Publication counters.
#[derive(Debug, Default)]
pub struct EventStats {
    /// Events published.
    pub published: AtomicU64,
    /// Deliveries skipped because a subscriber buffer was full.
    pub dropped: AtomicU64,
}

/// Fan-out of [`LifecycleEvent`]s to bounded subscriber channels.
#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LifecycleEvent>>>,
    capacity: usize,
    stats: EventStats,
}

impl EventBus {
    /// Creates a bus whose subscribers buffer `capacity` events each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            stats: EventStats::default(),
        }
    }

    /// Adds a subscriber with room for `capacity` undelivered events.
    ///
    /// Events published while the buffer is full are lost for this
    /// subscriber and counted in [`EventStats::dropped`]; receivers must be
    /// drained at least as fast as transitions happen.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (sender, receiver) = bounded(self.capacity);
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Delivers `event` to every subscriber without blocking.
    pub fn publish(&self, event: &LifecycleEvent) {
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        trace!(?event, "lifecycle event");

        self.subscribers.lock().retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?event, "subscriber buffer full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Publication counters.
    #[must_use]
    pub const fn stats(&self) -> &EventStats {
        &self.stats
    }
}
