//! # Raw Access Layer
//!
//! Typed single-value and array reads/writes at a remote virtual address.
//!
//! ## Ceilings
//!
//! Every call is checked against a hard transfer ceiling BEFORE the channel
//! is touched. A garbage count read from a torn header would otherwise turn
//! into a multi-gigabyte transfer.
//!
//! | Call            | Ceiling              |
//! |-----------------|----------------------|
//! | reads / writes  | [`MAX_READ_SIZE`]    |
//! | strings         | [`MAX_STRING_BYTES`] |

use std::sync::Arc;

use bytemuck::Pod;

use crate::address::RemoteAddress;
use crate::channel::{AcquisitionChannel, ProcessId, ReadFlags};
use crate::error::{MemoryError, MemoryResult};

/// Maximum bytes transferred by a single read (1500 pages).
pub const MAX_READ_SIZE: usize = 0x1000 * 1500;

/// Maximum bytes read for a single string.
pub const MAX_STRING_BYTES: usize = 0x1000;

/// Text encoding of a remote null-terminated string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8, one byte per code unit.
    Utf8,
    /// UTF-16 little endian, two bytes per code unit.
    Utf16,
}

/// Typed access to one remote process.
///
/// Cheap to clone; clones share the channel. Unrelated callers may use
/// clones concurrently - the layer itself holds no mutable state.
#[derive(Clone)]
pub struct RemoteMemory {
    channel: Arc<dyn AcquisitionChannel>,
    pid: ProcessId,
}

impl std::fmt::Debug for RemoteMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMemory").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl RemoteMemory {
    /// Binds a channel to a process.
    #[must_use]
    pub fn new(channel: Arc<dyn AcquisitionChannel>, pid: ProcessId) -> Self {
        Self { channel, pid }
    }

    /// Returns the bound process id.
    #[inline]
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Returns the underlying channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn AcquisitionChannel> {
        &self.channel
    }

    /// Reads `buf.len()` bytes at `address`.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` over the ceiling, `InvalidAddress` outside user space,
    /// `ReadFailed` if the channel reports failure.
    pub fn read_into(&self, address: RemoteAddress, buf: &mut [u8], use_cache: bool) -> MemoryResult<()> {
        check_size(buf.len(), MAX_READ_SIZE)?;
        if !address.is_valid() {
            return Err(MemoryError::InvalidAddress(address));
        }
        if self.channel.read(self.pid, address, buf, ReadFlags::from_use_cache(use_cache)) {
            Ok(())
        } else {
            Err(MemoryError::ReadFailed {
                address,
                len: buf.len(),
            })
        }
    }

    /// Reads a single value.
    ///
    /// # Errors
    ///
    /// See [`RemoteMemory::read_into`].
    pub fn read<T: Pod>(&self, address: RemoteAddress, use_cache: bool) -> MemoryResult<T> {
        let mut value = T::zeroed();
        self.read_into(address, bytemuck::bytes_of_mut(&mut value), use_cache)?;
        Ok(value)
    }

    /// Reads `count` contiguous values.
    ///
    /// # Errors
    ///
    /// See [`RemoteMemory::read_into`]; overflow of `count * size` is reported
    /// as `ReadTooLarge`.
    pub fn read_array<T: Pod>(&self, address: RemoteAddress, count: usize, use_cache: bool) -> MemoryResult<Vec<T>> {
        let len = array_len::<T>(count)?;
        check_size(len, MAX_READ_SIZE)?;
        let mut values = vec![T::zeroed(); count];
        self.read_into(address, bytemuck::cast_slice_mut(&mut values), use_cache)?;
        Ok(values)
    }

    /// Reads a pointer and validates it lies in user space.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if the pointer is null or out of range.
    pub fn read_ptr(&self, address: RemoteAddress, use_cache: bool) -> MemoryResult<RemoteAddress> {
        let ptr = RemoteAddress::new(self.read::<u64>(address, use_cache)?);
        if ptr.is_valid() {
            Ok(ptr)
        } else {
            Err(MemoryError::InvalidAddress(ptr))
        }
    }

    /// Follows `offsets` from `address`, dereferencing at each step.
    ///
    /// # Errors
    ///
    /// Fails on the first link that does not resolve.
    pub fn read_ptr_chain(&self, address: RemoteAddress, offsets: &[u64], use_cache: bool) -> MemoryResult<RemoteAddress> {
        let mut ptr = address;
        for &offset in offsets {
            let field = ptr
                .checked_offset(offset)
                .ok_or(MemoryError::InvalidAddress(ptr))?;
            ptr = self.read_ptr(field, use_cache)?;
        }
        Ok(ptr)
    }

    /// Reads a null-terminated string of at most `max_bytes` bytes.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` above [`MAX_STRING_BYTES`], `BadString` if the bytes
    /// do not decode.
    pub fn read_cstring(
        &self,
        address: RemoteAddress,
        max_bytes: usize,
        encoding: Encoding,
        use_cache: bool,
    ) -> MemoryResult<String> {
        check_size(max_bytes, MAX_STRING_BYTES)?;
        let mut buf = vec![0u8; max_bytes];
        self.read_into(address, &mut buf, use_cache)?;
        decode_cstring(&buf, encoding).ok_or(MemoryError::BadString(address))
    }

    /// Writes a single value.
    ///
    /// # Errors
    ///
    /// `WriteFailed` if the channel reports failure.
    pub fn write<T: Pod>(&self, address: RemoteAddress, value: T) -> MemoryResult<()> {
        let bytes = bytemuck::bytes_of(&value);
        check_size(bytes.len(), MAX_READ_SIZE)?;
        if !address.is_valid() {
            return Err(MemoryError::InvalidAddress(address));
        }
        if self.channel.write(self.pid, address, bytes) {
            Ok(())
        } else {
            Err(MemoryError::WriteFailed {
                address,
                len: bytes.len(),
            })
        }
    }

    /// Warms the channel cache before a burst of nearby reads.
    pub fn prefetch(&self, addresses: &[RemoteAddress]) {
        if !addresses.is_empty() {
            self.channel.prefetch(self.pid, addresses);
        }
    }
}

/// Byte length of `count` values of `T`.
pub(crate) fn array_len<T>(count: usize) -> MemoryResult<usize> {
    std::mem::size_of::<T>()
        .checked_mul(count)
        .ok_or(MemoryError::ReadTooLarge {
            requested: usize::MAX,
            max: MAX_READ_SIZE,
        })
}

/// Rejects transfers over `max` bytes.
pub(crate) fn check_size(len: usize, max: usize) -> MemoryResult<()> {
    if len > max {
        Err(MemoryError::ReadTooLarge { requested: len, max })
    } else {
        Ok(())
    }
}

/// Decodes up to the first terminator.
fn decode_cstring(buf: &[u8], encoding: Encoding) -> Option<String> {
    match encoding {
        Encoding::Utf8 => {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8(buf[..end].to_vec()).ok()
        }
        Encoding::Utf16 => {
            let units: Vec<u16> = buf
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect();
            String::from_utf16(&units).ok()
        }
    }
}
