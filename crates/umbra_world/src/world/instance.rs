//! One raid's worth of mirrored state and the loops that refresh it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace};
use umbra_core::{CancellationSource, CancellationToken, ReconcileReport};
use umbra_memory::{ConsistencyReader, RemoteAddress, ScatterBatch};

use super::discovery;
use crate::context::SessionContext;
use crate::entities::{Explosives, GroupTracker, Loot, QuestTracker, Roster};
use crate::error::{MirrorError, MirrorResult};
use crate::outcome::{CycleOutcome, RaidCheck, Verification};
use crate::scheduler::{FaultHook, SleepMode, Worker, WorkerSpec};

/// Bookkeeping passes of the slow loop, in run order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlowTask {
    Membership,
    Transforms,
    Loot,
    Equipment,
    Quests,
    Groups,
}

impl SlowTask {
    const ALL: [Self; 6] = [
        Self::Membership,
        Self::Transforms,
        Self::Loot,
        Self::Equipment,
        Self::Quests,
        Self::Groups,
    ];
}

/// A live world and its registries.
///
/// Created by [`WorldInstance::create`] once the object manager exposes a
/// loaded world; never reused after it ends.
#[derive(Debug)]
pub struct WorldInstance {
    ctx: Arc<SessionContext>,
    address: RemoteAddress,
    map_id: String,
    roster: Roster,
    explosives: Explosives,
    loot: Loot,
    quests: QuestTracker,
    groups: GroupTracker,
    source: CancellationSource,
    ended: AtomicBool,
    raid_started: AtomicBool,
    fault: Mutex<Option<MirrorError>>,
}

impl WorldInstance {
    /// Discovers the current world and builds its registries.
    ///
    /// The world's loops are not started; see [`WorldInstance::start_workers`].
    ///
    /// # Errors
    ///
    /// `WorldNotFound` while no loaded world is registered (the usual answer
    /// between raids), or any failed read along the way.
    pub fn create(ctx: Arc<SessionContext>, parent: &CancellationToken) -> MirrorResult<Arc<Self>> {
        let game_object = discovery::find_world_object(&ctx)?;
        let address = discovery::resolve_world(&ctx, game_object)?;
        let map_id = discovery::read_map_id(&ctx, address)?;

        let memory = ctx.memory();
        let layout = &ctx.config().layout.world;
        let local = memory.read_ptr(address.offset(layout.main_actor_offset), false)?;
        let actors = memory.read_ptr(address.offset(layout.actors_offset), false)?;

        let roster = Roster::new(Arc::clone(&ctx), actors, local);
        let members = roster.read_members()?;
        if members.is_empty() {
            return Err(MirrorError::WorldNotFound("no registered actors yet".to_owned()));
        }

        // Best effort: an unreadable hands controller is retried by the
        // slow loop.
        let raid_started = roster.read_raid_started().unwrap_or(false);

        let grouping = &ctx.config().grouping;
        let groups = GroupTracker::new(ctx.pid(), grouping.threshold, Arc::clone(ctx.store()));
        let world = Self {
            explosives: Explosives::new(Arc::clone(&ctx), address),
            loot: Loot::new(Arc::clone(&ctx), address),
            quests: QuestTracker::new(Arc::clone(&ctx), map_id.clone()),
            groups,
            roster,
            source: CancellationSource::child_of(parent),
            ended: AtomicBool::new(false),
            raid_started: AtomicBool::new(raid_started),
            fault: Mutex::new(None),
            address,
            map_id,
            ctx,
        };
        info!(
            map_id = world.map_id.as_str(),
            world = %address,
            local = %local,
            actors = members.len(),
            raid_started,
            "world found"
        );
        Ok(Arc::new(world))
    }

    /// Session context the world was built from.
    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Remote world object.
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }

    /// Map identifier.
    #[must_use]
    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Actors.
    #[must_use]
    pub const fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Grenades and tripwires.
    #[must_use]
    pub const fn explosives(&self) -> &Explosives {
        &self.explosives
    }

    /// Loose loot.
    #[must_use]
    pub const fn loot(&self) -> &Loot {
        &self.loot
    }

    /// Local player's quest state.
    #[must_use]
    pub const fn quests(&self) -> &QuestTracker {
        &self.quests
    }

    /// Group assignments.
    #[must_use]
    pub const fn groups(&self) -> &GroupTracker {
        &self.groups
    }

    /// Token every loop of this world derives from.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }

    /// True once the raid ended, the world faulted or it was cancelled.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire) || self.source.is_cancelled()
    }

    /// True once the local player left the pre-raid phase. Grouping stops
    /// from then on.
    #[must_use]
    pub fn is_raid_started(&self) -> bool {
        self.raid_started.load(Ordering::Acquire)
    }

    /// Stops every loop of this world.
    pub fn end(&self) {
        self.ended.store(true, Ordering::Release);
        self.source.cancel();
    }

    /// Records the error that stopped a loop and ends the world. Only the
    /// first fault is kept.
    pub fn record_fault(&self, error: MirrorError) {
        {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                *fault = Some(error);
            }
        }
        self.end();
    }

    /// Takes the recorded fault, if any.
    #[must_use]
    pub fn take_fault(&self) -> Option<MirrorError> {
        self.fault.lock().take()
    }

    /// One authority probe: the main-actor pointer still names the local
    /// player and the actor list is non-empty. Both are hot values and use
    /// verified reads.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let layout = &self.ctx.config().layout;
        let reader = ConsistencyReader::new(self.ctx.memory().clone());

        let main_actor = reader.read_ptr_verified(self.address.offset(layout.world.main_actor_offset));
        if main_actor.ok() != Some(self.roster.local_address()) {
            return false;
        }
        let count = reader.read_verified::<i32>(self.roster.list_address().offset(layout.list.count_offset));
        count.is_ok_and(|n| n > 0)
    }

    /// Revalidates the world with a bounded number of short retries.
    ///
    /// # Errors
    ///
    /// `WorldEnded` once the retry budget is spent (the world is marked
    /// ended), `Cancelled` if the token fires between retries.
    pub fn revalidate(&self, token: &CancellationToken) -> MirrorResult<()> {
        let retry = &self.ctx.config().retry;
        let mut check = RaidCheck::new(retry.raid_check_attempts);
        loop {
            token.check()?;
            match check.record(self.is_active()) {
                Verification::Alive => return Ok(()),
                Verification::Pending { failures } => {
                    trace!(map_id = self.map_id.as_str(), failures, "world not confirmed, retrying");
                    if !token.sleep(retry.raid_check_delay()) {
                        return Err(MirrorError::Cancelled);
                    }
                }
                Verification::Ended => {
                    info!(map_id = self.map_id.as_str(), "raid ended");
                    self.ended.store(true, Ordering::Release);
                    return Err(MirrorError::WorldEnded);
                }
            }
        }
    }

    /// Realtime cycle: positions and rotations of active actors.
    pub fn realtime_cycle(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> CycleOutcome {
        match self.roster.refresh_realtime(batch) {
            Ok(0) => {
                token.sleep(self.ctx.config().cadence.idle());
                CycleOutcome::Continue
            }
            Ok(_) => CycleOutcome::Continue,
            Err(e) => CycleOutcome::from(Err(e)),
        }
    }

    /// Slow cycle: revalidation, then the bookkeeping passes.
    ///
    /// Every pass receives the token and checks it between entities; a
    /// cancelled pass ends the cycle. A failing pass is logged and does not
    /// stop the ones after it.
    pub fn slow_cycle(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> CycleOutcome {
        if let Err(e) = self.revalidate(token) {
            return CycleOutcome::from(Err(e));
        }

        let mut first_error = None;
        for task in SlowTask::ALL {
            if token.is_cancelled() {
                return CycleOutcome::Fatal(MirrorError::Cancelled);
            }
            match self.run_slow_task(task, batch, token) {
                Ok(()) => {}
                Err(MirrorError::Cancelled) => return CycleOutcome::Fatal(MirrorError::Cancelled),
                Err(e) => {
                    debug!(?task, map_id = self.map_id.as_str(), "slow task failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        CycleOutcome::from(first_error.map_or(Ok(()), Err))
    }

    fn run_slow_task(&self, task: SlowTask, batch: &mut ScatterBatch, token: &CancellationToken) -> MirrorResult<()> {
        match task {
            SlowTask::Membership => self.refresh_membership(batch, token).map(|_| ()),
            SlowTask::Transforms => self.roster.validate_transforms().map(|_| ()),
            SlowTask::Loot => self.loot.refresh(token).map(|_| ()),
            SlowTask::Equipment => self.roster.refresh_equipment(token).map(|_| ()),
            SlowTask::Quests => self.quests.refresh(self.roster.local_address(), token).map(|_| ()),
            SlowTask::Groups => self.pre_raid_checks(token),
        }
    }

    /// Watches for the raid start and groups actors until it happens.
    ///
    /// Grouping is skipped while the local player is a scav.
    fn pre_raid_checks(&self, token: &CancellationToken) -> MirrorResult<()> {
        if self.is_raid_started() {
            return Ok(());
        }
        token.check()?;
        if self.roster.read_raid_started()? {
            self.raid_started.store(true, Ordering::Release);
            info!(map_id = self.map_id.as_str(), "raid started, groups frozen");
            return Ok(());
        }

        let config = self.ctx.config();
        let scav = self
            .roster
            .local()
            .is_some_and(|local| local.side() == config.layout.actor.scav_side);
        if config.grouping.enabled && !scav {
            self.groups.refresh(&self.roster.registry().snapshot());
        }
        Ok(())
    }

    /// Explosives cycle.
    pub fn explosives_cycle(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> CycleOutcome {
        CycleOutcome::from(self.explosives.refresh(batch, token))
    }

    /// Actor membership pass.
    ///
    /// # Errors
    ///
    /// A failed read of the actor list, or `Cancelled`.
    pub fn refresh_membership(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> MirrorResult<ReconcileReport> {
        let report = self.roster.refresh_membership(batch, token)?;
        if !report.is_unchanged() {
            debug!(
                map_id = self.map_id.as_str(),
                added = report.added,
                removed = report.removed,
                failed = report.failed,
                tracked = self.roster.registry().len(),
                "actors reconciled"
            );
        }
        Ok(report)
    }

    /// Starts the realtime, slow and explosives loops.
    ///
    /// A loop that stops on a fatal outcome records the fault and ends the
    /// world, which stops the other loops within one cycle.
    ///
    /// # Errors
    ///
    /// `Spawn` if a thread cannot be started; loops already started are
    /// stopped when the returned error drops them.
    pub fn start_workers(self: &Arc<Self>) -> MirrorResult<Vec<Worker>> {
        let token = self.token();
        let cadence = &self.ctx.config().cadence;
        let weak: Weak<Self> = Arc::downgrade(self);
        let on_fault: FaultHook = Arc::new(move |e| {
            if let Some(world) = weak.upgrade() {
                world.record_fault(e);
            }
        });

        let realtime = {
            let world = Arc::clone(self);
            let mut batch = ScatterBatch::new(self.ctx.memory().clone()).with_cache(false);
            Worker::spawn(
                WorkerSpec {
                    name: "realtime",
                    interval: cadence.realtime(),
                    mode: SleepMode::Dynamic,
                },
                &token,
                Arc::clone(&on_fault),
                move |token| world.realtime_cycle(&mut batch, token),
            )?
        };
        let slow = {
            let world = Arc::clone(self);
            let mut batch = ScatterBatch::new(self.ctx.memory().clone()).with_cache(false);
            Worker::spawn(
                WorkerSpec {
                    name: "slow",
                    interval: cadence.slow(),
                    mode: SleepMode::Fixed,
                },
                &token,
                Arc::clone(&on_fault),
                move |token| world.slow_cycle(&mut batch, token),
            )?
        };
        let explosives = {
            let world = Arc::clone(self);
            let mut batch = ScatterBatch::new(self.ctx.memory().clone()).with_cache(false);
            Worker::spawn(
                WorkerSpec {
                    name: "explosives",
                    interval: cadence.explosives(),
                    mode: SleepMode::Dynamic,
                },
                &token,
                on_fault,
                move |token| world.explosives_cycle(&mut batch, token),
            )?
        };
        Ok(vec![realtime, slow, explosives])
    }
}
