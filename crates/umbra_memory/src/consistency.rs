//! # Consistency Reader
//!
//! Verified reads for small values the remote process may be writing while
//! we read them (state enums, floats mid-update).
//!
//! Three independent uncached reads, a short spin between each, and all three
//! must be byte-identical. Costs 3x the latency, so it is capped at
//! [`MAX_VERIFIED_READ`] bytes and never used for bulk reads.

use bytemuck::Pod;
use tracing::trace;

use crate::access::{check_size, RemoteMemory};
use crate::address::RemoteAddress;
use crate::error::{MemoryError, MemoryResult};

/// Largest value (in bytes) a verified read accepts.
pub const MAX_VERIFIED_READ: usize = 0x100;

/// Number of samples that must agree.
const SAMPLES: usize = 3;

/// Spin iterations between samples.
const SPIN_ITERATIONS: u32 = 64;

/// Multi-sample reader over a [`RemoteMemory`].
#[derive(Clone, Debug)]
pub struct ConsistencyReader {
    memory: RemoteMemory,
}

impl ConsistencyReader {
    /// Wraps a memory handle.
    #[must_use]
    pub fn new(memory: RemoteMemory) -> Self {
        Self { memory }
    }

    /// Returns the wrapped memory handle.
    #[must_use]
    pub fn memory(&self) -> &RemoteMemory {
        &self.memory
    }

    /// Reads `T` three times uncached and accepts it only if every sample
    /// matches byte for byte.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` above [`MAX_VERIFIED_READ`], any read failure, or
    /// `ConsistencyMismatch` if the samples differ.
    pub fn read_verified<T: Pod>(&self, address: RemoteAddress) -> MemoryResult<T> {
        check_size(std::mem::size_of::<T>(), MAX_VERIFIED_READ)?;

        let first: T = self.memory.read(address, false)?;
        for _ in 1..SAMPLES {
            spin();
            let next: T = self.memory.read(address, false)?;
            if bytemuck::bytes_of(&first) != bytemuck::bytes_of(&next) {
                trace!(address = %address, "verified read mismatch");
                return Err(MemoryError::ConsistencyMismatch(address));
            }
        }
        Ok(first)
    }

    /// Verified pointer read; the agreed value must also be in user space.
    ///
    /// # Errors
    ///
    /// As [`ConsistencyReader::read_verified`], plus `InvalidAddress`.
    pub fn read_ptr_verified(&self, address: RemoteAddress) -> MemoryResult<RemoteAddress> {
        let ptr = RemoteAddress::new(self.read_verified::<u64>(address)?);
        if ptr.is_valid() {
            Ok(ptr)
        } else {
            Err(MemoryError::InvalidAddress(ptr))
        }
    }
}

#[inline]
fn spin() {
    for _ in 0..SPIN_ITERATIONS {
        std::hint::spin_loop();
    }
}
