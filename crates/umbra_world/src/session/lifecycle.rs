//! The lifecycle thread: attach, wait for a world, mirror it, tear it down,
//! repeat. Nothing escapes [`Lifecycle::run`]; panics are caught per
//! iteration and the next iteration starts over from `Attaching`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};
use umbra_core::{CancelSlot, CancellationToken};
use umbra_memory::{AcquisitionChannel, ProcessId, RemoteMemory};

use super::state::{SessionState, StateCell};
use crate::config::MirrorConfig;
use crate::context::{Session, SessionContext};
use crate::entities::{QuestCatalog, RelationshipStore};
use crate::error::{MirrorError, MirrorResult, ATTACH_TROUBLESHOOTING};
use crate::events::{EventBus, LifecycleEvent};
use crate::scheduler::{panic_message, Worker};
use crate::world::WorldInstance;

/// State shared between the lifecycle thread and the [`super::Mirror`]
/// handle. Only the lifecycle thread writes `context` and `world`.
pub(crate) struct Shared {
    pub(crate) channel: Arc<dyn AcquisitionChannel>,
    pub(crate) config: Arc<MirrorConfig>,
    pub(crate) catalog: Arc<QuestCatalog>,
    pub(crate) store: Arc<dyn RelationshipStore>,
    pub(crate) state: StateCell,
    pub(crate) context: RwLock<Option<Arc<SessionContext>>>,
    pub(crate) world: RwLock<Option<Arc<WorldInstance>>>,
    pub(crate) events: EventBus,
    pub(crate) slot: CancelSlot,
    pub(crate) shutdown: AtomicBool,
}

impl Shared {
    pub(crate) fn new(
        channel: Arc<dyn AcquisitionChannel>,
        config: MirrorConfig,
        catalog: QuestCatalog,
        store: Arc<dyn RelationshipStore>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        Self {
            channel,
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            store,
            state: StateCell::new(SessionState::Disconnected),
            context: RwLock::new(None),
            world: RwLock::new(None),
            events,
            slot: CancelSlot::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Moves the state machine; publishes only real changes.
    fn transition(&self, to: SessionState) {
        let from = self.state.swap(to);
        if from != to {
            debug!(?from, ?to, "session state");
            self.events.publish(&LifecycleEvent::StateChanged { from, to });
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Reports a persistent attach failure once, then quietly.
#[derive(Debug, Default)]
struct AttachTracker {
    failures: u64,
    reported: bool,
}

impl AttachTracker {
    fn failed(&mut self, process: &str, error: &MirrorError) {
        self.failures += 1;
        if self.reported {
            debug!(process, attempt = self.failures, "attach failed: {error}");
        } else {
            self.reported = true;
            warn!(process, "cannot attach: {error}\n{ATTACH_TROUBLESHOOTING}");
        }
    }

    fn succeeded(&mut self) -> u64 {
        std::mem::take(self).failures
    }
}

/// Tears a raid down however `run_world` exits, panics included.
struct RaidGuard<'a> {
    shared: &'a Shared,
    world: Arc<WorldInstance>,
    workers: Vec<Worker>,
}

impl<'a> RaidGuard<'a> {
    fn begin(shared: &'a Shared, world: Arc<WorldInstance>) -> Self {
        *shared.world.write() = Some(Arc::clone(&world));
        shared.transition(SessionState::InWorld);
        info!(map_id = world.map_id(), "raid started");
        shared.events.publish(&LifecycleEvent::RaidStarted {
            map_id: world.map_id().to_owned(),
        });
        Self {
            shared,
            world,
            workers: Vec::new(),
        }
    }
}

impl Drop for RaidGuard<'_> {
    fn drop(&mut self) {
        self.shared.transition(SessionState::Ending);
        self.world.end();
        for worker in &mut self.workers {
            worker.stop();
        }
        *self.shared.world.write() = None;
        info!(map_id = self.world.map_id(), "raid stopped");
        self.shared.events.publish(&LifecycleEvent::RaidStopped {
            map_id: self.world.map_id().to_owned(),
        });
    }
}

/// Driver owned by the lifecycle thread.
pub(crate) struct Lifecycle {
    shared: Arc<Shared>,
    attach: AttachTracker,
    /// Pid `ProcessStarting` was published for.
    starting: Option<ProcessId>,
    /// Pid `ProcessStarted` was published for.
    started: Option<ProcessId>,
}

impl Lifecycle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            attach: AttachTracker::default(),
            starting: None,
            started: None,
        }
    }

    /// Runs until shutdown.
    pub(crate) fn run(mut self) {
        info!(process = self.shared.config.process_name.as_str(), "lifecycle started");
        while !self.shared.is_shutting_down() {
            let token = self.shared.slot.token();
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.iteration(&token)))
                .unwrap_or_else(|payload| Err(MirrorError::Panicked(panic_message(&*payload))));
            if let Err(e) = result {
                self.handle(e);
            }
        }
        *self.shared.context.write() = None;
        self.shared.transition(SessionState::Disconnected);
        info!("lifecycle stopped");
    }

    fn iteration(&mut self, token: &CancellationToken) -> MirrorResult<()> {
        let ctx = self.attach(token)?;
        self.run_world(&ctx, token)
    }

    fn handle(&mut self, error: MirrorError) {
        let config = Arc::clone(&self.shared.config);
        let cadence = &config.cadence;
        let pause = match &error {
            MirrorError::Cancelled | MirrorError::WorldEnded => {
                debug!("re-attaching: {error}");
                cadence.teardown()
            }
            MirrorError::ProcessNotRunning => {
                self.disconnect();
                cadence.teardown()
            }
            _ => {
                error!("lifecycle iteration failed: {error}");
                cadence.attach_backoff()
            }
        };
        if !self.shared.is_shutting_down() {
            self.shared.slot.token().sleep(pause);
        }
    }

    /// Retries until the target is found and its module resolved.
    fn attach(&mut self, token: &CancellationToken) -> MirrorResult<Arc<SessionContext>> {
        *self.shared.context.write() = None;
        self.shared.transition(SessionState::Attaching);

        let config = Arc::clone(&self.shared.config);
        let session = loop {
            token.check()?;
            match self.try_attach() {
                Ok(session) => break session,
                Err(MirrorError::ProcessNotRunning) if self.started.is_some() => {
                    return Err(MirrorError::ProcessNotRunning);
                }
                Err(e) => {
                    self.attach.failed(&config.process_name, &e);
                    self.shared.channel.refresh();
                    if !token.sleep(config.cadence.attach_backoff()) {
                        return Err(MirrorError::Cancelled);
                    }
                }
            }
        };

        let retries = self.attach.succeeded();
        let memory = RemoteMemory::new(Arc::clone(&self.shared.channel), session.pid);
        let ctx = Arc::new(SessionContext::new(
            session,
            memory,
            Arc::clone(&self.shared.config),
            Arc::clone(&self.shared.catalog),
            Arc::clone(&self.shared.store),
        ));
        *self.shared.context.write() = Some(Arc::clone(&ctx));
        self.shared.transition(SessionState::Attached);

        if self.started != Some(session.pid) {
            self.started = Some(session.pid);
            info!(
                pid = session.pid,
                module_base = %session.module_base,
                object_manager = %session.object_manager,
                retries,
                "attached"
            );
            self.shared
                .events
                .publish(&LifecycleEvent::ProcessStarted { pid: session.pid });
        }
        Ok(ctx)
    }

    fn try_attach(&mut self) -> MirrorResult<Session> {
        let channel = &self.shared.channel;
        let config = &self.shared.config;

        let pid = channel
            .find_process(&config.process_name)
            .ok_or(MirrorError::ProcessNotRunning)?;
        if self.starting != Some(pid) {
            self.starting = Some(pid);
            debug!(pid, "target process found");
            self.shared.events.publish(&LifecycleEvent::ProcessStarting { pid });
        }

        let module_base = channel
            .module_base(pid, &config.module_name)
            .ok_or_else(|| MirrorError::ModuleNotFound(config.module_name.clone()))?;
        let memory = RemoteMemory::new(Arc::clone(channel), pid);
        let object_manager = memory.read_ptr(module_base.offset(config.layout.objects.manager_offset), false)?;
        Ok(Session {
            pid,
            module_base,
            object_manager,
        })
    }

    /// Polls for a world, mirrors it until it ends, and tears it down.
    fn run_world(&self, ctx: &Arc<SessionContext>, token: &CancellationToken) -> MirrorResult<()> {
        let cadence = &self.shared.config.cadence;
        let world = loop {
            token.check()?;
            self.check_process(ctx, token)?;
            match WorldInstance::create(Arc::clone(ctx), token) {
                Ok(world) => break world,
                Err(e) => {
                    trace!("no world yet: {e}");
                    if !token.sleep(cadence.world_poll()) {
                        return Err(MirrorError::Cancelled);
                    }
                }
            }
        };

        let mut raid = RaidGuard::begin(&self.shared, Arc::clone(&world));
        raid.workers = world.start_workers()?;
        self.monitor(ctx, &world, token)
    }

    /// Watches the process and the world's fault slot until either ends.
    fn monitor(&self, ctx: &SessionContext, world: &WorldInstance, token: &CancellationToken) -> MirrorResult<()> {
        let interval = self.shared.config.cadence.monitor();
        loop {
            if !token.sleep(interval) {
                return Err(MirrorError::Cancelled);
            }
            self.check_process(ctx, token)?;
            if let Some(fault) = world.take_fault() {
                return Err(fault);
            }
            if world.is_ended() {
                return Err(MirrorError::WorldEnded);
            }
        }
    }

    /// Confirms the attached pid is still alive, with a short retry budget.
    fn check_process(&self, ctx: &SessionContext, token: &CancellationToken) -> MirrorResult<()> {
        let channel = &self.shared.channel;
        let config = &self.shared.config;
        let retry = &config.retry;

        for attempt in 1..=retry.process_check_attempts {
            if channel.find_process(&config.process_name) == Some(ctx.pid()) {
                return Ok(());
            }
            trace!(pid = ctx.pid(), attempt, "process check failed");
            channel.refresh();
            if attempt < retry.process_check_attempts && !token.sleep(retry.process_check_delay()) {
                return Err(MirrorError::Cancelled);
            }
        }
        Err(MirrorError::ProcessNotRunning)
    }

    /// Invalidates the session after the process is gone.
    fn disconnect(&mut self) {
        *self.shared.context.write() = None;
        self.shared.transition(SessionState::Disconnected);
        self.starting = None;
        if let Some(pid) = self.started.take() {
            info!(pid, "target process stopped");
            self.shared.events.publish(&LifecycleEvent::ProcessStopped { pid });
        }
    }
}

#[cfg(test)]
mod tests {
    use umbra_memory::MemoryError;

    use super::*;

    #[test]
    fn test_attach_tracker_reports_once() {
        let mut tracker = AttachTracker::default();
        let error = MirrorError::ProcessNotRunning;
        tracker.failed("target.exe", &error);
        assert!(tracker.reported);
        tracker.failed("target.exe", &error);
        assert_eq!(tracker.failures, 2);

        assert_eq!(tracker.succeeded(), 2);
        assert!(!tracker.reported);
        tracker.failed("target.exe", &MirrorError::from(MemoryError::ChannelUnavailable("x".into())));
        assert!(tracker.reported);
    }
}
