//! # Entity Registry
//!
//! Reconciling map from remote address to a locally owned wrapper.
//!
//! Each cycle the owning refresh loop reads the remote membership list and
//! reconciles against it:
//!
//! ```text
//! observed = read remote list
//! for addr in observed:  get-or-create (construct once, discard on failure)
//! remove every key not in observed              (mark-and-sweep)
//! ```
//!
//! Lookups and get-or-create are safe from any thread. A reconciliation
//! pass over one registry is only ever run by the loop owning it.

mod entity;
#[allow(clippy::module_inception)]
mod registry;

pub use entity::RemoteEntity;
pub use registry::{EntityRegistry, ReconcileReport};
