//! # Synchronization Primitives
//!
//! - [`cancel`]: cooperative cancellation with interruptible sleeps
//! - [`atomic`]: tear-free scalar cells for concurrently refreshed fields

pub mod atomic;
pub mod cancel;

pub use atomic::{AtomicF32, AtomicVec2, AtomicVec3};
pub use cancel::{CancelSlot, Cancelled, CancellationSource, CancellationToken};
