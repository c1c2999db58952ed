//! # Remote Addresses
//!
//! A remote address is an opaque 64-bit virtual address inside the target
//! process. Nothing about the type guarantees the memory behind it exists.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Lowest address considered part of user space.
const USER_SPACE_MIN: u64 = 0x1_0000;

/// Highest address considered part of user space (x64 canonical lower half).
const USER_SPACE_MAX: u64 = 0x7FFF_FFFF_FFFF;

/// A virtual address inside the remote process.
///
/// Validity is never guaranteed by construction; [`RemoteAddress::is_valid`]
/// only checks that the value lies inside the user-space range.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct RemoteAddress(u64);

impl RemoteAddress {
    /// Null/invalid address.
    pub const NULL: Self = Self(0);

    /// Wraps a raw address.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Checks if this address is null.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Checks if this address lies in the user-space range.
    ///
    /// Zero and kernel-half values are both invalid.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= USER_SPACE_MIN && self.0 <= USER_SPACE_MAX
    }

    /// Returns this address displaced by `offset` bytes.
    ///
    /// Wraps on overflow; a wrapped address fails [`RemoteAddress::is_valid`].
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Returns this address displaced by `offset` bytes, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_offset(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl From<u64> for RemoteAddress {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<RemoteAddress> for u64 {
    fn from(addr: RemoteAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_invalid() {
        assert!(RemoteAddress::NULL.is_null());
        assert!(!RemoteAddress::NULL.is_valid());
    }

    #[test]
    fn test_user_space_bounds() {
        assert!(!RemoteAddress::new(0xFFFF).is_valid());
        assert!(RemoteAddress::new(0x1_0000).is_valid());
        assert!(RemoteAddress::new(0x7FFF_FFFF_FFFF).is_valid());
        assert!(!RemoteAddress::new(0x8000_0000_0000).is_valid());
        assert!(!RemoteAddress::new(0xFFFF_F800_0000_0000).is_valid());
    }

    #[test]
    fn test_offset_overflow() {
        let addr = RemoteAddress::new(u64::MAX - 4);
        assert!(addr.checked_offset(8).is_none());
        assert!(!addr.offset(8).is_valid());
        assert_eq!(RemoteAddress::new(0x1000).offset(0x20).raw(), 0x1020);
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(RemoteAddress::new(0xABC0).to_string(), "0xabc0");
    }
}
