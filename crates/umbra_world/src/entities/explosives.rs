//! # Explosives
//!
//! Grenades in flight and placed tripwires, reconciled by the explosives
//! loop.
//!
//! - **Grenades** come from the world's grenade list. Smoke grenades are
//!   tagged at discovery and never refreshed. Live grenades have their
//!   destroyed flag and position scatter-read each cycle; a destroyed
//!   grenade removes itself from the registry and is not re-hydrated while
//!   it stays listed. Once it leaves the list the address is eligible again.
//! - **Tripwires** come from the synchronizable-objects list, filtered by
//!   type tag. Position is read once; state every cycle until spent. A
//!   tracked tripwire whose tag read fails keeps its entry for the cycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use umbra_core::{AtomicVec3, CancellationToken, EntityRegistry, ReconcileReport, RemoteEntity, Vec3};
use umbra_memory::{read_address_list, MemoryError, RemoteAddress, ScatterBatch};

use super::actor::{read_class_name, resolve_position_address};
use crate::context::SessionContext;
use crate::error::MirrorResult;

/// A thrown grenade.
#[derive(Debug)]
pub struct Grenade {
    address: RemoteAddress,
    smoke: bool,
    position_address: RemoteAddress,
    position: AtomicVec3,
}

impl RemoteEntity for Grenade {
    fn address(&self) -> RemoteAddress {
        self.address
    }
}

impl Grenade {
    /// Reads class tag and transform of the grenade at `address`.
    ///
    /// # Errors
    ///
    /// Any failed read discards the candidate.
    pub fn hydrate(ctx: &SessionContext, address: RemoteAddress) -> MirrorResult<Self> {
        let memory = ctx.memory();
        let layout = &ctx.config().layout;
        let class_name = read_class_name(memory, address, &layout.class_name, true)?;
        let smoke = class_name.contains(layout.explosives.smoke_class_marker.as_str());
        if smoke {
            return Ok(Self {
                address,
                smoke,
                position_address: RemoteAddress::NULL,
                position: AtomicVec3::default(),
            });
        }
        let transform = memory.read_ptr_chain(address, &layout.explosives.grenade_transform_chain, true)?;
        let position_address = resolve_position_address(memory, transform, &layout.transform)?;
        Ok(Self {
            address,
            smoke,
            position_address,
            position: AtomicVec3::default(),
        })
    }

    /// Remote address.
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }

    /// True for smoke grenades, which are never refreshed.
    #[must_use]
    pub const fn is_smoke(&self) -> bool {
        self.smoke
    }

    /// Last refreshed position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position.load()
    }
}

/// Tripwire state tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TripwireState {
    /// Not initialized.
    None,
    /// Placed, arming.
    Wait,
    /// Armed.
    Active,
    /// Triggered.
    Exploding,
    /// Done.
    Exploded,
    /// Disarmed.
    Inert,
}

impl TripwireState {
    /// Decodes the remote tag.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Wait,
            2 => Self::Active,
            3 => Self::Exploding,
            4 => Self::Exploded,
            5 => Self::Inert,
            _ => return None,
        })
    }

    /// `Wait` or `Active`.
    #[must_use]
    pub const fn is_armed(self) -> bool {
        matches!(self, Self::Wait | Self::Active)
    }

    /// `Exploded` or `Inert`; no further reads.
    #[must_use]
    pub const fn is_spent(self) -> bool {
        matches!(self, Self::Exploded | Self::Inert)
    }
}

/// A placed tripwire.
#[derive(Debug)]
pub struct Tripwire {
    address: RemoteAddress,
    position: Vec3,
    state: AtomicI32,
}

impl RemoteEntity for Tripwire {
    fn address(&self) -> RemoteAddress {
        self.address
    }
}

impl Tripwire {
    /// Reads position and initial state of the tripwire at `address`.
    ///
    /// # Errors
    ///
    /// A failed read or a garbage position discards the candidate.
    pub fn hydrate(ctx: &SessionContext, address: RemoteAddress) -> MirrorResult<Self> {
        let memory = ctx.memory();
        let layout = &ctx.config().layout.explosives;
        let position: Vec3 = memory.read(address.offset(layout.tripwire_position_offset), true)?;
        if !position.is_normal() {
            return Err(MemoryError::ReadFailed {
                address: address.offset(layout.tripwire_position_offset),
                len: std::mem::size_of::<Vec3>(),
            }
            .into());
        }
        let state: i32 = memory.read(address.offset(layout.tripwire_state_offset), false)?;
        Ok(Self {
            address,
            position,
            state: AtomicI32::new(state),
        })
    }

    /// Remote address.
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }

    /// Placement position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Last read state; `None` for an unknown tag.
    #[must_use]
    pub fn state(&self) -> Option<TripwireState> {
        TripwireState::from_raw(self.state.load(Ordering::Relaxed))
    }

    /// True while armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state().is_some_and(TripwireState::is_armed)
    }

    /// True once spent.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.state().is_some_and(TripwireState::is_spent)
    }
}

/// Grenade and tripwire registries of one world.
#[derive(Debug)]
pub struct Explosives {
    ctx: Arc<SessionContext>,
    world: RemoteAddress,
    grenades: Arc<EntityRegistry<Grenade>>,
    destroyed: Arc<Mutex<HashSet<RemoteAddress>>>,
    tripwires: EntityRegistry<Tripwire>,
}

impl Explosives {
    /// Registries for the world at `world`.
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>, world: RemoteAddress) -> Self {
        Self {
            ctx,
            world,
            grenades: Arc::new(EntityRegistry::new("grenades")),
            destroyed: Arc::default(),
            tripwires: EntityRegistry::new("tripwires"),
        }
    }

    /// Tracked grenades.
    #[must_use]
    pub fn grenades(&self) -> &EntityRegistry<Grenade> {
        &self.grenades
    }

    /// Tracked tripwires.
    #[must_use]
    pub const fn tripwires(&self) -> &EntityRegistry<Tripwire> {
        &self.tripwires
    }

    /// One explosives cycle. Grenade and tripwire failures are independent;
    /// the first error is returned after both ran.
    ///
    /// # Errors
    ///
    /// A failed list read, or `Cancelled`.
    pub fn refresh(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> MirrorResult<()> {
        let grenades = self.refresh_grenades(batch, token);
        let tripwires = self.refresh_tripwires(batch, token);
        grenades.and(tripwires).map(|_| ())
    }

    /// Reconciles and refreshes grenades.
    ///
    /// # Errors
    ///
    /// A failed list read, or `Cancelled`.
    pub fn refresh_grenades(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> MirrorResult<ReconcileReport> {
        let memory = self.ctx.memory();
        let config = self.ctx.config();
        let layout = &config.layout;

        let list = memory.read_ptr_chain(self.world, &layout.world.grenades_chain, false)?;
        let listed = read_address_list(memory, list, &layout.list, config.limits.max_objects, false)?;
        let observed: Vec<RemoteAddress> = {
            let mut destroyed = self.destroyed.lock();
            destroyed.retain(|address| listed.contains(address));
            listed.into_iter().filter(|address| !destroyed.contains(address)).collect()
        };
        let report = self
            .grenades
            .reconcile_cancellable(observed, token, |address| Grenade::hydrate(&self.ctx, address))?;

        let destroyed_offset = layout.explosives.destroyed_offset;
        for grenade in self.grenades.snapshot().into_iter().filter(|g| !g.is_smoke()) {
            let destroyed = batch.prepare_read::<u8>(grenade.address.offset(destroyed_offset))?;
            let position = batch.prepare_read::<Vec3>(grenade.position_address)?;
            let registry = Arc::clone(&self.grenades);
            let spent = Arc::clone(&self.destroyed);
            batch.on_completed(move |results| {
                if results.get(&destroyed).is_some_and(|flag| flag != 0) {
                    spent.lock().insert(grenade.address);
                    registry.remove(grenade.address);
                    trace!(address = %grenade.address, "grenade destroyed");
                    return;
                }
                if let Some(p) = results.get(&position).filter(|p| p.is_normal()) {
                    grenade.position.store(p);
                }
            });
        }
        if !batch.is_empty() {
            batch.execute();
        }
        Ok(report)
    }

    /// Reconciles tripwires and refreshes their state.
    ///
    /// # Errors
    ///
    /// A failed list read, or `Cancelled`.
    pub fn refresh_tripwires(&self, batch: &mut ScatterBatch, token: &CancellationToken) -> MirrorResult<ReconcileReport> {
        let memory = self.ctx.memory();
        let config = self.ctx.config();
        let layout = &config.layout;
        let explosives = &layout.explosives;

        let list = memory.read_ptr_chain(self.world, &layout.world.sync_objects_chain, false)?;
        let candidates = read_address_list(memory, list, &layout.list, config.limits.max_objects, false)?;

        // Type tags of every synchronizable object in one round trip.
        let mut tags = Vec::with_capacity(candidates.len());
        for &address in &candidates {
            tags.push((address, batch.prepare_read::<i32>(address.offset(explosives.sync_type_offset))?));
        }
        let results = batch.execute();
        let observed: HashSet<RemoteAddress> = tags
            .into_iter()
            .filter(|&(address, tag)| match results.get(&tag) {
                Some(tag) => tag == explosives.tripwire_type,
                None => self.tripwires.contains(address),
            })
            .map(|(address, _)| address)
            .collect();

        let report = self
            .tripwires
            .reconcile_cancellable(observed, token, |address| Tripwire::hydrate(&self.ctx, address))?;
        if report.added > 0 {
            debug!(added = report.added, tracked = self.tripwires.len(), "tripwires discovered");
        }

        let pending: Vec<_> = self
            .tripwires
            .snapshot()
            .into_iter()
            .filter(|t| !t.is_spent())
            .map(|t| {
                batch
                    .prepare_read::<i32>(t.address.offset(explosives.tripwire_state_offset))
                    .map(|handle| (t, handle))
            })
            .collect::<Result<_, _>>()?;
        if !pending.is_empty() {
            let results = batch.execute();
            for (tripwire, handle) in pending {
                if let Some(state) = results.get(&handle) {
                    tripwire.state.store(state, Ordering::Relaxed);
                }
            }
        }
        Ok(report)
    }
}
