//! # UMBRA Core
//!
//! Concurrency building blocks shared by every refresh loop:
//!
//! - [`EntityRegistry`]: remote address → locally owned wrapper, reconciled
//!   against the live remote membership list each cycle
//! - [`CancellationSource`] / [`CancellationToken`]: cooperative cancellation
//!   with interruptible sleeps
//! - [`AtomicF32`] / [`AtomicVec3`]: scalar cells a consumer may read while
//!   a loop rewrites them
//! - [`grouping`]: transitive proximity clustering
//!
//! ## Architecture Rules
//!
//! 1. **No remote I/O** - factories passed in by callers do the reads
//! 2. **One reconciler per registry** - many readers, one loop sweeps
//! 3. **Never torn below a word** - every shared scalar is an atomic

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod grouping;
pub mod math;
pub mod registry;
pub mod sync;

pub use grouping::{assign_groups, cluster, GroupAllocator, GroupAssignment, GroupId, DEFAULT_GROUP_THRESHOLD};
pub use math::{Vec2, Vec3};
pub use registry::{EntityRegistry, ReconcileReport, RemoteEntity};
pub use sync::{AtomicF32, AtomicVec2, AtomicVec3, CancelSlot, Cancelled, CancellationSource, CancellationToken};
