//! # World Mirror
//!
//! A [`WorldInstance`] owns every registry of one raid and the three loops
//! that refresh them:
//!
//! | Loop         | Cadence | Pacing  | Work                                       |
//! |--------------|---------|---------|--------------------------------------------|
//! | `realtime`   | 8 ms    | dynamic | actor positions and rotations, 1 scatter   |
//! | `slow`       | 50 ms   | fixed   | revalidate, membership, loot, quests, ...  |
//! | `explosives` | 30 ms   | dynamic | grenades and tripwires                     |
//!
//! Each loop owns its own scatter batch. Each registry is reconciled by
//! exactly one loop.
//!
//! Consumers only see a [`WorldView`].

mod discovery;
mod instance;
mod view;

pub use discovery::{find_world_object, read_map_id, resolve_world};
pub use instance::WorldInstance;
pub use view::WorldView;
