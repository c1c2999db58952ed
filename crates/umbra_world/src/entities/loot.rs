//! Loose loot, reconciled by the slow loop. Each item's id and position are
//! read once at discovery.

use std::sync::Arc;

use umbra_core::{CancellationToken, EntityRegistry, ReconcileReport, RemoteEntity, Vec3};
use umbra_memory::{read_address_list, read_managed_string, RemoteAddress};

use super::actor::resolve_position_address;
use crate::context::SessionContext;
use crate::error::MirrorResult;

/// A loose item lying in the world.
#[derive(Debug)]
pub struct LootItem {
    address: RemoteAddress,
    item_id: String,
    position: Vec3,
}

impl RemoteEntity for LootItem {
    fn address(&self) -> RemoteAddress {
        self.address
    }
}

impl LootItem {
    /// Reads id and position of the loot object at `address`.
    ///
    /// # Errors
    ///
    /// Any failed read discards the candidate.
    pub fn hydrate(ctx: &SessionContext, address: RemoteAddress) -> MirrorResult<Self> {
        let memory = ctx.memory();
        let layout = &ctx.config().layout;

        let id_object = memory.read_ptr_chain(address, &layout.loot.item_id_chain, true)?;
        let item_id = read_managed_string(memory, id_object, &layout.string, true)?;
        let transform = memory.read_ptr_chain(address, &layout.loot.transform_chain, true)?;
        let cell = resolve_position_address(memory, transform, &layout.transform)?;
        let position: Vec3 = memory.read(cell, false)?;
        Ok(Self {
            address,
            item_id,
            position,
        })
    }

    /// Remote address.
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }

    /// Item template id.
    #[must_use]
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Position at discovery.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }
}

/// Loot registry of one world.
#[derive(Debug)]
pub struct Loot {
    ctx: Arc<SessionContext>,
    world: RemoteAddress,
    items: EntityRegistry<LootItem>,
}

impl Loot {
    /// Registry for the world at `world`. The list pointer is resolved on
    /// every refresh; it is null until the world finishes loading.
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>, world: RemoteAddress) -> Self {
        Self {
            ctx,
            world,
            items: EntityRegistry::new("loot"),
        }
    }

    /// Tracked items.
    #[must_use]
    pub const fn items(&self) -> &EntityRegistry<LootItem> {
        &self.items
    }

    /// Reconciles against the remote list. `token` is checked before every
    /// item is hydrated.
    ///
    /// # Errors
    ///
    /// A failed list read, or `Cancelled` with the registry left unswept.
    pub fn refresh(&self, token: &CancellationToken) -> MirrorResult<ReconcileReport> {
        let config = self.ctx.config();
        let memory = self.ctx.memory();
        let list = memory.read_ptr(self.world.offset(config.layout.world.loot_offset), false)?;
        let observed = read_address_list(
            memory,
            list,
            &config.layout.list,
            config.limits.max_objects,
            false,
        )?;
        let report = self
            .items
            .reconcile_cancellable(observed, token, |address| LootItem::hydrate(&self.ctx, address))?;
        Ok(report)
    }
}
