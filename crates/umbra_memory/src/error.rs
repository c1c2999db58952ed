//! # Memory Error Types
//!
//! All errors that can occur while touching the remote process.

use thiserror::Error;

use crate::address::RemoteAddress;

/// Errors that can occur in the remote access layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The acquisition hardware/driver is not present or refused to open.
    #[error("acquisition channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The channel reported a failed read.
    #[error("memory read failed at {address} ({len} bytes)")]
    ReadFailed {
        /// Address of the read.
        address: RemoteAddress,
        /// Requested length in bytes.
        len: usize,
    },

    /// The channel reported a failed write.
    #[error("memory write failed at {address} ({len} bytes)")]
    WriteFailed {
        /// Address of the write.
        address: RemoteAddress,
        /// Length in bytes.
        len: usize,
    },

    /// Repeated uncached reads of the same address disagreed.
    #[error("consistency check failed at {0}")]
    ConsistencyMismatch(RemoteAddress),

    /// A pointer resolved to null or outside user space.
    #[error("invalid remote address {0}")]
    InvalidAddress(RemoteAddress),

    /// A request exceeded the per-call transfer ceiling.
    #[error("read of {requested} bytes exceeds ceiling of {max} bytes")]
    ReadTooLarge {
        /// Requested length in bytes.
        requested: usize,
        /// Ceiling in bytes.
        max: usize,
    },

    /// A remote collection reported a count outside the accepted range.
    #[error("remote collection at {address} reported bad count {count}")]
    BadCount {
        /// Address of the collection.
        address: RemoteAddress,
        /// Reported count.
        count: i64,
    },

    /// A remote string did not decode.
    #[error("remote string at {0} is not valid text")]
    BadString(RemoteAddress),
}

impl MemoryError {
    /// Returns true if the error means "value or entity momentarily or
    /// permanently unavailable" rather than a broken channel.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ChannelUnavailable(_))
    }
}

/// Result type for remote memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
