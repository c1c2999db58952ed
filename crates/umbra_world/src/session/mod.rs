//! # Session Lifecycle
//!
//! [`Mirror`] is the driver handle. Starting it probes the acquisition
//! channel and spawns the lifecycle thread, which then runs forever:
//!
//! ```text
//! ┌───────────┐  found   ┌──────────┐  world   ┌─────────┐
//! │ Attaching │ ───────▶ │ Attached │ ───────▶ │ InWorld │
//! └───────────┘          └──────────┘          └─────────┘
//!       ▲                                           │ ended / restart / fault
//!       │                 ┌────────┐                │
//!       └──────────────── │ Ending │ ◀──────────────┘
//!                         └────────┘
//! ```
//!
//! A confirmed-dead process drops to `Disconnected` from any state and
//! the next iteration is back in `Attaching`. Attaching never gives up.
//!
//! ## Events
//!
//! Every transition is published on the lifecycle thread through a
//! non-blocking bus; see [`crate::events`].

mod lifecycle;
mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, error, info};
use umbra_memory::{AcquisitionChannel, MemoryError, RemoteAddress};

pub use state::SessionState;

use self::lifecycle::{Lifecycle, Shared};
use crate::config::MirrorConfig;
use crate::context::Session;
use crate::entities::{QuestCatalog, RelationshipStore};
use crate::error::{MirrorError, MirrorResult};
use crate::events::{EventStats, LifecycleEvent};
use crate::world::WorldView;
use crate::write::{within, ScalarValue};

/// Handle on a running mirror. Dropping it shuts the lifecycle down.
pub struct Mirror {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl Mirror {
    /// Validates `config`, probes `channel` and starts the lifecycle thread.
    ///
    /// # Errors
    ///
    /// `Config` for an invalid configuration, `ChannelUnavailable` (with
    /// troubleshooting steps) if the probe fails, `Spawn` if the thread
    /// cannot start.
    pub fn start(
        channel: Arc<dyn AcquisitionChannel>,
        config: MirrorConfig,
        catalog: QuestCatalog,
        store: Arc<dyn RelationshipStore>,
    ) -> MirrorResult<Self> {
        config.validate()?;
        channel.probe().map_err(|e| {
            let reason = match e {
                MemoryError::ChannelUnavailable(reason) => reason,
                other => other.to_string(),
            };
            let error = MirrorError::ChannelUnavailable { reason };
            error!("{error}");
            error
        })?;

        let shared = Arc::new(Shared::new(channel, config, catalog, store));
        let lifecycle = Lifecycle::new(Arc::clone(&shared));
        let handle = thread::Builder::new()
            .name("umbra-lifecycle".to_owned())
            .spawn(move || lifecycle.run())
            .map_err(|e| MirrorError::Spawn {
                name: "lifecycle",
                reason: e.to_string(),
            })?;

        info!(
            process = shared.config.process_name.as_str(),
            module = shared.config.module_name.as_str(),
            "mirror started"
        );
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Addresses of the current attach, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.shared.context.read().as_ref().map(|ctx| *ctx.session())
    }

    /// The world being mirrored, if any.
    #[must_use]
    pub fn world(&self) -> Option<WorldView> {
        self.shared.world.read().as_ref().map(|world| WorldView::new(Arc::clone(world)))
    }

    /// Subscribes to lifecycle events.
    ///
    /// The receiver buffers `event_buffer` events. Publishing never waits
    /// for a slow consumer: once the buffer is full further events are
    /// dropped for it and counted in [`crate::events::EventStats::dropped`].
    #[must_use]
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    /// Event publication counters.
    #[must_use]
    pub fn event_stats(&self) -> &EventStats {
        self.shared.events.stats()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.shared.config
    }

    /// Cancels the current world and attach; the lifecycle starts over from
    /// `Attaching`.
    pub fn restart(&self) {
        info!(state = ?self.state(), "restart requested");
        self.shared.slot.replace();
    }

    /// Writes one scalar into the target.
    ///
    /// # Errors
    ///
    /// `NotAttached` without a session, otherwise the failed write.
    pub fn write_value<T: ScalarValue>(&self, address: RemoteAddress, value: T) -> MirrorResult<()> {
        let ctx = self.shared.context.read().clone().ok_or(MirrorError::NotAttached)?;
        ctx.memory().write(address, value)?;
        debug!(address = %address, ?value, "value written");
        Ok(())
    }

    /// Writes `desired` unless the current value is already within
    /// `tolerance`. Returns true if a write was issued.
    ///
    /// # Errors
    ///
    /// `NotAttached` without a session, otherwise the failed read or write.
    pub fn ensure_value<T: ScalarValue>(&self, address: RemoteAddress, desired: T, tolerance: f64) -> MirrorResult<bool> {
        let ctx = self.shared.context.read().clone().ok_or(MirrorError::NotAttached)?;
        let current: T = ctx.memory().read(address, false)?;
        if within(current, desired, tolerance) {
            return Ok(false);
        }
        ctx.memory().write(address, desired)?;
        debug!(address = %address, ?current, ?desired, "value corrected");
        Ok(true)
    }

    /// Stops the lifecycle thread and every world loop. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.slot.cancel();
        if handle.join().is_err() {
            error!("lifecycle thread panicked during shutdown");
        }
        info!("mirror stopped");
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}
