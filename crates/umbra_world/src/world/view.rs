//! Read-only handle on the current world for rendering, broadcast and
//! other consumers.

use std::collections::HashSet;
use std::sync::Arc;

use umbra_memory::RemoteAddress;

use super::instance::WorldInstance;
use crate::entities::{Actor, Grenade, LootItem, QuestLocation, Tripwire};

/// Cheaply cloneable view of one world. Stays valid after the world ends;
/// the collections simply stop changing.
#[derive(Clone, Debug)]
pub struct WorldView {
    world: Arc<WorldInstance>,
}

impl WorldView {
    pub(crate) fn new(world: Arc<WorldInstance>) -> Self {
        Self { world }
    }

    /// Map identifier.
    #[must_use]
    pub fn map_id(&self) -> &str {
        self.world.map_id()
    }

    /// Remote world object.
    #[must_use]
    pub fn address(&self) -> RemoteAddress {
        self.world.address()
    }

    /// True while the raid is being mirrored.
    #[must_use]
    pub fn is_raid_active(&self) -> bool {
        !self.world.is_ended()
    }

    /// False during the pre-raid phase, while groups are still formed.
    #[must_use]
    pub fn is_raid_started(&self) -> bool {
        self.world.is_raid_started()
    }

    /// Every tracked actor, corpses included.
    #[must_use]
    pub fn actors(&self) -> Vec<Arc<Actor>> {
        self.world.roster().registry().snapshot()
    }

    /// One actor by address.
    #[must_use]
    pub fn actor(&self, address: RemoteAddress) -> Option<Arc<Actor>> {
        self.world.roster().registry().get(address)
    }

    /// The local player.
    #[must_use]
    pub fn local_actor(&self) -> Option<Arc<Actor>> {
        self.world.roster().local()
    }

    /// Grenades in flight.
    #[must_use]
    pub fn grenades(&self) -> Vec<Arc<Grenade>> {
        self.world.explosives().grenades().snapshot()
    }

    /// Placed tripwires.
    #[must_use]
    pub fn tripwires(&self) -> Vec<Arc<Tripwire>> {
        self.world.explosives().tripwires().snapshot()
    }

    /// Loose loot.
    #[must_use]
    pub fn loot(&self) -> Vec<Arc<LootItem>> {
        self.world.loot().items().snapshot()
    }

    /// Item ids the local player still needs.
    #[must_use]
    pub fn quest_items(&self) -> HashSet<String> {
        self.world.quests().items()
    }

    /// Quest markers still outstanding on this map.
    #[must_use]
    pub fn quest_locations(&self) -> Vec<QuestLocation> {
        self.world.quests().locations()
    }

    /// Started quests.
    #[must_use]
    pub fn started_quests(&self) -> HashSet<String> {
        self.world.quests().started()
    }
}
