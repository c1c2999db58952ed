//! # Acquisition Channel
//!
//! The seam between the mirror and whatever hardware/driver exposes the
//! remote address space. Backends implement [`AcquisitionChannel`]; the rest
//! of the workspace only ever sees `Arc<dyn AcquisitionChannel>`.
//!
//! ## Contract
//!
//! - Every method may block for a full channel round trip.
//! - A `false` return means "this transfer failed", nothing more. Success
//!   does NOT mean the bytes are fresh or untorn.
//! - Implementations must be safe for concurrent use by unrelated callers.

use crate::address::RemoteAddress;
use crate::error::MemoryResult;

/// Identifier of a process on the target machine.
pub type ProcessId = u32;

/// Per-read behaviour flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadFlags {
    /// Bypass the channel's page cache and fetch fresh bytes.
    pub no_cache: bool,
}

impl ReadFlags {
    /// Cached read (default).
    pub const CACHED: Self = Self { no_cache: false };
    /// Fresh, uncached read.
    pub const FRESH: Self = Self { no_cache: true };

    /// Flags for the classic `use_cache` boolean.
    #[inline]
    #[must_use]
    pub const fn from_use_cache(use_cache: bool) -> Self {
        Self { no_cache: !use_cache }
    }
}

/// One entry of a batched read.
///
/// The channel fills `buf` and sets `ok` for every slot it managed to read.
#[derive(Clone, Debug)]
pub struct ScatterSlot {
    /// Address to read from.
    pub address: RemoteAddress,
    /// Destination buffer; its length is the read size.
    pub buf: Vec<u8>,
    /// Set by the channel when this individual read succeeded.
    pub ok: bool,
}

impl ScatterSlot {
    /// Creates an unresolved slot of `len` bytes.
    #[must_use]
    pub fn new(address: RemoteAddress, len: usize) -> Self {
        Self {
            address,
            buf: vec![0; len],
            ok: false,
        }
    }
}

/// Out-of-band access to another process's address space.
pub trait AcquisitionChannel: Send + Sync {
    /// Checks the hardware/driver is present and usable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::ChannelUnavailable`] with diagnostic text.
    fn probe(&self) -> MemoryResult<()> {
        Ok(())
    }

    /// Drops any process/module caches held by the backend.
    fn refresh(&self) {}

    /// Looks up a process by executable name.
    fn find_process(&self, name: &str) -> Option<ProcessId>;

    /// Resolves the base address of a loaded module.
    fn module_base(&self, pid: ProcessId, module: &str) -> Option<RemoteAddress>;

    /// Reads `buf.len()` bytes at `address`.
    fn read(&self, pid: ProcessId, address: RemoteAddress, buf: &mut [u8], flags: ReadFlags) -> bool;

    /// Writes `data` at `address`.
    fn write(&self, pid: ProcessId, address: RemoteAddress, data: &[u8]) -> bool;

    /// Performs every slot read in one round trip.
    ///
    /// The default falls back to one read per slot; real backends override
    /// this with a true batched transfer.
    fn read_scatter(&self, pid: ProcessId, slots: &mut [ScatterSlot], flags: ReadFlags) {
        for slot in slots.iter_mut() {
            slot.ok = self.read(pid, slot.address, &mut slot.buf, flags);
        }
    }

    /// Warms the backend cache for pages containing `addresses`.
    fn prefetch(&self, _pid: ProcessId, _addresses: &[RemoteAddress]) {}
}
