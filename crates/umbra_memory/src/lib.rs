//! # UMBRA Memory
//!
//! Remote memory access for a process that cannot be instrumented.
//!
//! ## Layers
//!
//! ```text
//!   ScatterMap (N dependent rounds)
//!        │
//!   ScatterBatch (1 round trip)      ConsistencyReader (3x uncached)
//!        │                                   │
//!        └──────────────┬────────────────────┘
//!                       ▼
//!                 RemoteMemory (typed reads, size ceilings)
//!                       │
//!                       ▼
//!              dyn AcquisitionChannel (driver / hardware)
//! ```
//!
//! The channel is assumed hostile: reads can fail, return stale bytes or
//! return torn values without any error signal. Everything above the channel
//! reports failure as [`MemoryError`] and never panics.
//!
//! ## Example
//!
//! ```rust,ignore
//! use umbra_memory::{RemoteMemory, RemoteAddress};
//!
//! let memory = RemoteMemory::new(channel, pid);
//! let health: f32 = memory.read(RemoteAddress::new(0x1_4000_0000), false)?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod access;
pub mod address;
pub mod channel;
pub mod collections;
pub mod consistency;
pub mod error;
pub mod scatter;
pub mod scatter_map;
#[cfg(any(test, feature = "simulation"))]
pub mod sim;

pub use access::{Encoding, RemoteMemory, MAX_READ_SIZE, MAX_STRING_BYTES};
pub use address::RemoteAddress;
pub use channel::{AcquisitionChannel, ProcessId, ReadFlags, ScatterSlot};
pub use collections::{read_address_list, read_managed_string, read_value_list, ListLayout, StringLayout};
pub use consistency::{ConsistencyReader, MAX_VERIFIED_READ};
pub use error::{MemoryError, MemoryResult};
pub use scatter::{ScatterArrayHandle, ScatterBatch, ScatterHandle, ScatterResults};
pub use scatter_map::{ScatterMap, ScatterRound, MAX_SCATTER_ROUNDS};
#[cfg(any(test, feature = "simulation"))]
pub use sim::SimulatedChannel;
