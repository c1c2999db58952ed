//! # Actor Roster
//!
//! The actor registry of one world and the refresh passes that keep it in
//! sync with the remote registered-actors list.
//!
//! | Pass                  | Loop     | Work                                          |
//! |-----------------------|----------|-----------------------------------------------|
//! | `refresh_membership`  | slow     | reconcile list, corpse check, sweep           |
//! | `refresh_realtime`    | realtime | position + rotation of active actors, 1 trip  |
//! | `validate_transforms` | slow     | 2-round re-resolution of position cells       |
//! | `refresh_equipment`   | slow     | item ids of active non-local humans           |
//! | `read_raid_started`   | slow     | local player's hands controller class         |

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};
use umbra_core::{CancellationToken, EntityRegistry, ReconcileReport, Vec2, Vec3};
use umbra_memory::{read_address_list, read_managed_string, MemoryError, RemoteAddress, ScatterBatch, ScatterMap};

use super::actor::{position_cell, read_class_name, Actor, ActorKind, ActorState};
use crate::context::SessionContext;
use crate::error::MirrorResult;

/// Actors of one world.
#[derive(Debug)]
pub struct Roster {
    ctx: Arc<SessionContext>,
    list: RemoteAddress,
    local: RemoteAddress,
    actors: EntityRegistry<Actor>,
}

impl Roster {
    /// Roster backed by the remote list at `list`; `local` is the local
    /// player's object.
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>, list: RemoteAddress, local: RemoteAddress) -> Self {
        Self {
            ctx,
            list,
            local,
            actors: EntityRegistry::new("actors"),
        }
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry<Actor> {
        &self.actors
    }

    /// Remote list address.
    #[must_use]
    pub const fn list_address(&self) -> RemoteAddress {
        self.list
    }

    /// Local player's object address.
    #[must_use]
    pub const fn local_address(&self) -> RemoteAddress {
        self.local
    }

    /// The local player, once hydrated.
    #[must_use]
    pub fn local(&self) -> Option<Arc<Actor>> {
        self.actors.get(self.local)
    }

    /// Whether the local player has left the pre-raid phase.
    ///
    /// Until the raid starts the local player holds an empty-hands
    /// controller; any other controller means it started.
    ///
    /// # Errors
    ///
    /// A failed read, or a class name that is not a hands controller.
    pub fn read_raid_started(&self) -> MirrorResult<bool> {
        let memory = self.ctx.memory();
        let layout = &self.ctx.config().layout;
        let hands_slot = self.local.offset(layout.actor.hands_controller_offset);
        let hands = memory.read_ptr(hands_slot, false)?;
        let class = read_class_name(memory, hands, &layout.class_name, false)?;
        if !class.contains(layout.actor.hands_class_marker.as_str()) {
            return Err(MemoryError::ReadFailed {
                address: hands_slot,
                len: std::mem::size_of::<u64>(),
            }
            .into());
        }
        Ok(class != layout.actor.empty_hands_class)
    }

    /// Reads the current remote membership.
    ///
    /// # Errors
    ///
    /// Any failure reading the list header or items.
    pub fn read_members(&self) -> MirrorResult<Vec<RemoteAddress>> {
        let config = self.ctx.config();
        Ok(read_address_list(
            self.ctx.memory(),
            self.list,
            &config.layout.list,
            config.limits.max_actors,
            false,
        )?)
    }

    /// Membership pass.
    ///
    /// Observed actors are created (once) and marked active. Tracked alive
    /// actors that left the list get their corpse pointer scatter-read:
    /// non-null marks them dead, anything else unreachable. Finally every
    /// unobserved actor is swept unless it is a corpse still inside the
    /// retention window.
    ///
    /// `token` is checked before each new actor is hydrated; a cancelled
    /// pass stops there and sweeps nothing.
    ///
    /// # Errors
    ///
    /// A failed list read or `Cancelled`; per-actor failures are counted.
    pub fn refresh_membership(
        &self,
        batch: &mut ScatterBatch,
        token: &CancellationToken,
    ) -> MirrorResult<ReconcileReport> {
        let observed: HashSet<RemoteAddress> = self.read_members()?.into_iter().collect();
        let mut report = ReconcileReport {
            observed: observed.len(),
            ..ReconcileReport::default()
        };

        for &address in &observed {
            let known = self.actors.contains(address);
            if !known {
                token.check()?;
            }
            match self
                .actors
                .get_or_create(address, |address| Actor::hydrate(&self.ctx, address, self.local))
            {
                Ok(actor) => {
                    if !known {
                        report.added += 1;
                        debug!(address = %address, name = actor.name(), kind = ?actor.kind(), "actor discovered");
                    }
                    actor.mark_active();
                }
                Err(e) => {
                    report.failed += 1;
                    debug!(address = %address, "actor discarded: {e}");
                }
            }
        }

        let corpse_offset = self.ctx.config().layout.actor.corpse_offset;
        let departed = self
            .actors
            .snapshot()
            .into_iter()
            .filter(|actor| actor.is_alive() && !observed.contains(&actor.address()));
        for actor in departed {
            let corpse = batch.prepare_read_ptr(actor.address().offset(corpse_offset))?;
            batch.on_completed(move |results| match results.get_ptr(&corpse) {
                Some(corpse) => {
                    actor.mark_dead(corpse);
                    debug!(address = %actor.address(), name = actor.name(), "actor died");
                }
                None => {
                    actor.mark_unreachable();
                    debug!(address = %actor.address(), name = actor.name(), "actor left");
                }
            });
        }
        if !batch.is_empty() {
            batch.execute();
        }

        let retention = self.ctx.config().corpse_retention();
        report.removed = self.actors.sweep_retaining(&observed, |actor| {
            actor.state() == ActorState::Dead && !actor.corpse_expired(retention)
        });
        Ok(report)
    }

    /// Realtime pass: one scatter round trip for every active actor.
    ///
    /// Returns the number of actors planned; zero means nothing was read.
    ///
    /// # Errors
    ///
    /// Only if a read could not be planned.
    pub fn refresh_realtime(&self, batch: &mut ScatterBatch) -> MirrorResult<usize> {
        let active: Vec<Arc<Actor>> = self.actors.snapshot().into_iter().filter(|a| a.is_active()).collect();
        if active.is_empty() {
            return Ok(0);
        }

        for actor in &active {
            let position = batch.prepare_read::<Vec3>(actor.position_address())?;
            let rotation = batch.prepare_read::<Vec2>(actor.rotation_address())?;
            let actor = Arc::clone(actor);
            batch.on_completed(move |results| {
                if let Some(p) = results.get(&position) {
                    actor.set_position(p);
                }
                if let Some(r) = results.get(&rotation) {
                    actor.set_rotation(r);
                }
            });
        }
        batch.execute();
        Ok(active.len())
    }

    /// Re-resolves every active actor's position cell.
    ///
    /// Round 1 reads each transform's hierarchy pointer and vertex index,
    /// round 2 the hierarchy's vertex array pointer. A cell that moved is
    /// swapped in for the realtime pass. Returns the number re-resolved.
    ///
    /// # Errors
    ///
    /// Only if a read could not be planned.
    pub fn validate_transforms(&self) -> MirrorResult<usize> {
        let layout = self.ctx.config().layout.transform;
        let mut map = ScatterMap::new(self.ctx.memory().clone()).with_cache(false);
        let changed = Arc::new(AtomicUsize::new(0));

        for actor in self.actors.snapshot().into_iter().filter(|a| a.is_active()) {
            let transform = actor.transform();
            let hierarchy = map.round().prepare_read_ptr(transform.offset(layout.hierarchy_offset))?;
            let index = map.round().prepare_read::<i32>(transform.offset(layout.index_offset))?;
            let changed = Arc::clone(&changed);

            map.round().on_completed(move |results, next| {
                let (Some(hierarchy), Some(index)) = (results.get_ptr(&hierarchy), results.get(&index)) else {
                    return;
                };
                let Ok(vertices) = next.prepare_read_ptr(hierarchy.offset(layout.vertices_offset)) else {
                    return;
                };
                next.on_completed(move |results, _| {
                    let Some(vertices) = results.get_ptr(&vertices) else {
                        return;
                    };
                    if let Ok(cell) = position_cell(vertices, index, &layout) {
                        if cell != actor.position_address() {
                            trace!(address = %actor.address(), cell = %cell, "position cell moved");
                            actor.set_position_address(cell);
                            changed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            });
        }
        map.execute();
        Ok(changed.load(Ordering::Relaxed))
    }

    /// Re-reads equipment of every active non-local human.
    ///
    /// Returns the number of actors refreshed; failures are skipped.
    ///
    /// # Errors
    ///
    /// `Cancelled` once `token` fires; actors already refreshed keep their
    /// new lists.
    pub fn refresh_equipment(&self, token: &CancellationToken) -> MirrorResult<usize> {
        let mut refreshed = 0;
        for actor in self.actors.snapshot() {
            if actor.kind() != ActorKind::Human || !actor.is_active() {
                continue;
            }
            token.check()?;
            match self.read_equipment(&actor) {
                Ok(items) => {
                    actor.set_equipment(items);
                    refreshed += 1;
                }
                Err(e) => trace!(address = %actor.address(), "equipment read failed: {e}"),
            }
        }
        Ok(refreshed)
    }

    fn read_equipment(&self, actor: &Actor) -> MirrorResult<Vec<String>> {
        let memory = self.ctx.memory();
        let config = self.ctx.config();
        let layout = &config.layout;

        let list = memory.read_ptr_chain(actor.address(), &layout.actor.equipment_chain, false)?;
        let items = read_address_list(memory, list, &layout.list, config.limits.max_equipment, false)?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let id = memory.read_ptr_chain(item, &layout.actor.item_id_chain, true).ok()?;
                read_managed_string(memory, id, &layout.string, true).ok()
            })
            .collect())
    }
}
