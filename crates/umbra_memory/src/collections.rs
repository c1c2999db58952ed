//! # Remote Collections
//!
//! Decoding of the remote runtime's growable lists and length-prefixed
//! strings. Both carry a count read from remote memory, and a torn or stale
//! header yields garbage counts, so every count is range-checked before it
//! sizes a transfer.

use serde::{Deserialize, Serialize};

use crate::access::{check_size, RemoteMemory, MAX_STRING_BYTES};
use crate::address::RemoteAddress;
use crate::error::{MemoryError, MemoryResult};

/// Field offsets of a remote growable list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListLayout {
    /// Offset of the backing-array pointer inside the list object.
    pub items_offset: u64,
    /// Offset of the element count (i32) inside the list object.
    pub count_offset: u64,
    /// Offset of element 0 inside the backing array.
    pub first_element_offset: u64,
}

impl Default for ListLayout {
    fn default() -> Self {
        Self {
            items_offset: 0x10,
            count_offset: 0x18,
            first_element_offset: 0x20,
        }
    }
}

/// Field offsets of a remote length-prefixed UTF-16 string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringLayout {
    /// Offset of the character count (i32).
    pub length_offset: u64,
    /// Offset of the first UTF-16 code unit.
    pub chars_offset: u64,
}

impl Default for StringLayout {
    fn default() -> Self {
        Self {
            length_offset: 0x10,
            chars_offset: 0x14,
        }
    }
}

/// Reads every element pointer of the list at `list`.
///
/// Null and out-of-range entries are dropped; the list may therefore come
/// back shorter than its reported count.
///
/// # Errors
///
/// `BadCount` if the count is negative or above `max_count`, otherwise any
/// failure of the underlying reads.
pub fn read_address_list(
    memory: &RemoteMemory,
    list: RemoteAddress,
    layout: &ListLayout,
    max_count: usize,
    use_cache: bool,
) -> MemoryResult<Vec<RemoteAddress>> {
    let count = read_count(memory, list, layout.count_offset, max_count, use_cache)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let items = memory.read_ptr(list.offset(layout.items_offset), use_cache)?;
    let raw: Vec<u64> = memory.read_array(items.offset(layout.first_element_offset), count, use_cache)?;
    Ok(raw
        .into_iter()
        .map(RemoteAddress::new)
        .filter(|address| address.is_valid())
        .collect())
}

/// Reads the value elements of a list of plain values (ids, enums).
///
/// # Errors
///
/// As [`read_address_list`].
pub fn read_value_list<T: bytemuck::Pod>(
    memory: &RemoteMemory,
    list: RemoteAddress,
    layout: &ListLayout,
    max_count: usize,
    use_cache: bool,
) -> MemoryResult<Vec<T>> {
    let count = read_count(memory, list, layout.count_offset, max_count, use_cache)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let items = memory.read_ptr(list.offset(layout.items_offset), use_cache)?;
    memory.read_array(items.offset(layout.first_element_offset), count, use_cache)
}

/// Reads a length-prefixed UTF-16 string object.
///
/// # Errors
///
/// `BadCount` for a negative or oversized length, `BadString` if the code
/// units do not decode.
pub fn read_managed_string(
    memory: &RemoteMemory,
    string: RemoteAddress,
    layout: &StringLayout,
    use_cache: bool,
) -> MemoryResult<String> {
    let max_units = MAX_STRING_BYTES / 2;
    let units = read_count(memory, string, layout.length_offset, max_units, use_cache)?;
    check_size(units * 2, MAX_STRING_BYTES)?;
    let code_units: Vec<u16> = memory.read_array(string.offset(layout.chars_offset), units, use_cache)?;
    String::from_utf16(&code_units).map_err(|_| MemoryError::BadString(string))
}

fn read_count(
    memory: &RemoteMemory,
    object: RemoteAddress,
    count_offset: u64,
    max_count: usize,
    use_cache: bool,
) -> MemoryResult<usize> {
    let count: i32 = memory.read(object.offset(count_offset), use_cache)?;
    match usize::try_from(count) {
        Ok(n) if n <= max_count => Ok(n),
        _ => Err(MemoryError::BadCount {
            address: object,
            count: i64::from(count),
        }),
    }
}
