//! # UMBRA World
//!
//! Session lifecycle and world mirror on top of [`umbra_memory`] and
//! [`umbra_core`].
//!
//! ## Data flow
//!
//! ```text
//!   dyn AcquisitionChannel
//!          │
//!   Mirror ── lifecycle thread ── attach ── SessionContext
//!                                   │
//!                             WorldInstance ─┬─ realtime loop ─▶ Roster
//!                                   │        ├─ slow loop ─────▶ Roster, Loot, Quests, Groups
//!                                   │        └─ explosives loop ▶ Explosives
//!                                   ▼
//!                               WorldView ──▶ rendering / broadcast
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use umbra_world::{InMemoryRelationshipStore, Mirror, MirrorConfig, QuestCatalog};
//!
//! let config = MirrorConfig::load("umbra.toml")?;
//! let mirror = Mirror::start(channel, config, QuestCatalog::default(), Arc::new(InMemoryRelationshipStore::new()))?;
//! let events = mirror.subscribe();
//! if let Some(world) = mirror.world() {
//!     for actor in world.actors() {
//!         println!("{} at {:?}", actor.name(), actor.position());
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod events;
pub mod layout;
pub mod outcome;
pub mod scheduler;
pub mod session;
pub mod world;
pub mod write;

pub use config::{CadenceConfig, ConfigError, ConfigResult, GroupingConfig, LimitsConfig, MirrorConfig, RetryConfig};
pub use context::{Session, SessionContext};
pub use entities::{
    Actor, ActorKind, ActorState, Grenade, InMemoryRelationshipStore, LootItem, QuestCatalog, QuestLocation,
    RelationshipStore, Relationships, Tripwire, TripwireState,
};
pub use error::{MirrorError, MirrorResult, Severity};
pub use events::{EventBus, EventStats, LifecycleEvent};
pub use layout::RemoteLayout;
pub use outcome::{CycleOutcome, RaidCheck, Verification};
pub use scheduler::{SleepMode, Worker, WorkerSpec, WorkerStats};
pub use session::{Mirror, SessionState};
pub use world::{WorldInstance, WorldView};
pub use write::ScalarValue;
