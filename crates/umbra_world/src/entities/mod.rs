//! # World Entities
//!
//! Remote-backed entity types and the per-class registries a world owns.
//!
//! - [`actor`] / [`roster`]: actors and their membership, realtime and
//!   transform passes
//! - [`explosives`]: grenades and tripwires
//! - [`loot`]: loose items
//! - [`quests`]: outstanding quest items and locations
//! - [`groups`]: proximity grouping and its persistence contract

pub mod actor;
pub mod explosives;
pub mod groups;
pub mod loot;
pub mod quests;
pub mod roster;

pub use actor::{Actor, ActorKind, ActorState};
pub use explosives::{Explosives, Grenade, Tripwire, TripwireState};
pub use groups::{GroupTracker, InMemoryRelationshipStore, RelationshipStore, Relationships};
pub use loot::{Loot, LootItem};
pub use quests::{
    ObjectiveKind, QuestCatalog, QuestDefinition, QuestLocation, QuestObjective, QuestProgress, QuestTracker, QuestZone,
};
pub use roster::Roster;
