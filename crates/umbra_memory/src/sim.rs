//! # Simulated Channel
//!
//! In-memory [`AcquisitionChannel`] used by tests and offline tooling
//! (`simulation` feature).
//!
//! Holds one sparse, page-mapped address space plus a process and module
//! table. Faults can be injected per address:
//!
//! - **failing**: any read covering the address fails
//! - **volatile**: the value changes on every read (optionally only for the
//!   next `k` reads, then holds still)
//!
//! Counters expose how many reads, fresh reads and scatter round trips the
//! code under test issued.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::address::RemoteAddress;
use crate::channel::{AcquisitionChannel, ProcessId, ReadFlags, ScatterSlot};
use crate::error::{MemoryError, MemoryResult};

const PAGE_SIZE: u64 = 0x1000;

type Page = Box<[u8; PAGE_SIZE as usize]>;

#[derive(Debug)]
struct Volatile {
    address: RemoteAddress,
    len: u64,
    remaining: Option<u32>,
}

#[derive(Default)]
struct Space {
    pages: HashMap<u64, Page>,
    processes: HashMap<String, ProcessId>,
    modules: HashMap<(ProcessId, String), RemoteAddress>,
    failing: HashSet<u64>,
    volatile: Vec<Volatile>,
    unavailable: Option<String>,
}

impl Space {
    fn alive(&self, pid: ProcessId) -> bool {
        self.processes.values().any(|&p| p == pid)
    }

    fn map(&mut self, address: u64, len: u64) {
        if len == 0 {
            return;
        }
        let first = address / PAGE_SIZE;
        let last = (address + len - 1) / PAGE_SIZE;
        for page in first..=last {
            self.pages
                .entry(page)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
        }
    }

    fn copy_out(&self, address: u64, buf: &mut [u8]) -> bool {
        let mut done = 0usize;
        while done < buf.len() {
            let at = address + done as u64;
            let Some(page) = self.pages.get(&(at / PAGE_SIZE)) else {
                return false;
            };
            let offset = (at % PAGE_SIZE) as usize;
            let n = (PAGE_SIZE as usize - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
        }
        true
    }

    fn copy_in(&mut self, address: u64, data: &[u8]) -> bool {
        let mut done = 0usize;
        while done < data.len() {
            let at = address + done as u64;
            let Some(page) = self.pages.get_mut(&(at / PAGE_SIZE)) else {
                return false;
            };
            let offset = (at % PAGE_SIZE) as usize;
            let n = (PAGE_SIZE as usize - offset).min(data.len() - done);
            page[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        true
    }

    /// Advances every volatile cell overlapping the range.
    fn churn(&mut self, address: u64, len: u64) {
        let mut bumps = Vec::new();
        for cell in &mut self.volatile {
            let start = cell.address.raw();
            let overlaps = start < address + len && address < start + cell.len;
            if !overlaps {
                continue;
            }
            match &mut cell.remaining {
                Some(0) => continue,
                Some(n) => *n -= 1,
                None => {}
            }
            bumps.push(start);
        }
        for start in bumps {
            let mut byte = [0u8; 1];
            if self.copy_out(start, &mut byte) {
                byte[0] = byte[0].wrapping_add(1);
                self.copy_in(start, &byte);
            }
        }
    }

    fn read(&mut self, pid: ProcessId, address: RemoteAddress, buf: &mut [u8]) -> bool {
        if !self.alive(pid) || buf.is_empty() {
            return false;
        }
        let start = address.raw();
        let len = buf.len() as u64;
        if self.failing.iter().any(|&a| a >= start && a < start + len) {
            return false;
        }
        self.churn(start, len);
        self.copy_out(start, buf)
    }
}

/// In-memory acquisition channel with fault injection.
#[derive(Default)]
pub struct SimulatedChannel {
    space: Mutex<Space>,
    read_calls: AtomicU64,
    fresh_reads: AtomicU64,
    scatter_calls: AtomicU64,
    write_calls: AtomicU64,
}

impl std::fmt::Debug for SimulatedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let space = self.space.lock();
        f.debug_struct("SimulatedChannel")
            .field("pages", &space.pages.len())
            .field("processes", &space.processes)
            .finish_non_exhaustive()
    }
}

impl SimulatedChannel {
    /// Creates an empty channel with no processes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`AcquisitionChannel::probe`] fail with `reason`.
    pub fn set_unavailable(&self, reason: impl Into<String>) {
        self.space.lock().unavailable = Some(reason.into());
    }

    /// Starts a process.
    pub fn add_process(&self, name: &str, pid: ProcessId) {
        self.space.lock().processes.insert(name.to_owned(), pid);
    }

    /// Kills a process and forgets its modules.
    pub fn kill_process(&self, name: &str) {
        let mut space = self.space.lock();
        if let Some(pid) = space.processes.remove(name) {
            space.modules.retain(|(owner, _), _| *owner != pid);
        }
    }

    /// Registers a loaded module.
    pub fn add_module(&self, pid: ProcessId, module: &str, base: RemoteAddress) {
        self.space.lock().modules.insert((pid, module.to_owned()), base);
    }

    /// Maps zeroed pages covering `[address, address + len)`.
    pub fn map(&self, address: RemoteAddress, len: usize) {
        self.space.lock().map(address.raw(), len as u64);
    }

    /// Unmaps every page touching `[address, address + len)`.
    pub fn unmap(&self, address: RemoteAddress, len: usize) {
        if len == 0 {
            return;
        }
        let first = address.raw() / PAGE_SIZE;
        let last = (address.raw() + len as u64 - 1) / PAGE_SIZE;
        let mut space = self.space.lock();
        for page in first..=last {
            space.pages.remove(&page);
        }
    }

    /// Writes raw bytes, mapping pages as needed.
    pub fn write_bytes(&self, address: RemoteAddress, data: &[u8]) {
        let mut space = self.space.lock();
        space.map(address.raw(), data.len() as u64);
        space.copy_in(address.raw(), data);
    }

    /// Writes a value, mapping pages as needed.
    pub fn write_value<T: Pod>(&self, address: RemoteAddress, value: T) {
        self.write_bytes(address, bytemuck::bytes_of(&value));
    }

    /// Writes a slice of values, mapping pages as needed.
    pub fn write_slice<T: Pod>(&self, address: RemoteAddress, values: &[T]) {
        self.write_bytes(address, bytemuck::cast_slice(values));
    }

    /// Reads a value without counting it or triggering faults.
    #[must_use]
    pub fn peek<T: Pod>(&self, address: RemoteAddress) -> Option<T> {
        let mut value = T::zeroed();
        self.space
            .lock()
            .copy_out(address.raw(), bytemuck::bytes_of_mut(&mut value))
            .then_some(value)
    }

    /// Every read covering `address` fails until [`SimulatedChannel::clear_faults`].
    pub fn fail_address(&self, address: RemoteAddress) {
        self.space.lock().failing.insert(address.raw());
    }

    /// The `len` bytes at `address` change on every read.
    pub fn make_volatile(&self, address: RemoteAddress, len: usize) {
        self.space.lock().volatile.push(Volatile {
            address,
            len: len as u64,
            remaining: None,
        });
    }

    /// The `len` bytes at `address` change on each of the next `reads` reads,
    /// then hold still.
    pub fn make_volatile_for(&self, address: RemoteAddress, len: usize, reads: u32) {
        self.space.lock().volatile.push(Volatile {
            address,
            len: len as u64,
            remaining: Some(reads),
        });
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        let mut space = self.space.lock();
        space.failing.clear();
        space.volatile.clear();
    }

    /// Number of single reads issued.
    #[must_use]
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// Number of uncached reads issued (single or scattered).
    #[must_use]
    pub fn fresh_reads(&self) -> u64 {
        self.fresh_reads.load(Ordering::Relaxed)
    }

    /// Number of scatter round trips issued.
    #[must_use]
    pub fn scatter_calls(&self) -> u64 {
        self.scatter_calls.load(Ordering::Relaxed)
    }

    /// Number of writes issued.
    #[must_use]
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }
}

impl AcquisitionChannel for SimulatedChannel {
    fn probe(&self) -> MemoryResult<()> {
        match &self.space.lock().unavailable {
            Some(reason) => Err(MemoryError::ChannelUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn find_process(&self, name: &str) -> Option<ProcessId> {
        self.space.lock().processes.get(name).copied()
    }

    fn module_base(&self, pid: ProcessId, module: &str) -> Option<RemoteAddress> {
        self.space.lock().modules.get(&(pid, module.to_owned())).copied()
    }

    fn read(&self, pid: ProcessId, address: RemoteAddress, buf: &mut [u8], flags: ReadFlags) -> bool {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        if flags.no_cache {
            self.fresh_reads.fetch_add(1, Ordering::Relaxed);
        }
        self.space.lock().read(pid, address, buf)
    }

    fn write(&self, pid: ProcessId, address: RemoteAddress, data: &[u8]) -> bool {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        let mut space = self.space.lock();
        space.alive(pid) && space.copy_in(address.raw(), data)
    }

    fn read_scatter(&self, pid: ProcessId, slots: &mut [ScatterSlot], flags: ReadFlags) {
        self.scatter_calls.fetch_add(1, Ordering::Relaxed);
        if flags.no_cache {
            self.fresh_reads.fetch_add(slots.len() as u64, Ordering::Relaxed);
        }
        let mut space = self.space.lock();
        for slot in slots.iter_mut() {
            slot.ok = space.read(pid, slot.address, &mut slot.buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_page_round_trip() {
        let sim = SimulatedChannel::new();
        sim.add_process("a.exe", 1);
        let addr = RemoteAddress::new(0x1_0FFC);
        sim.write_value(addr, 0x1122_3344_5566_7788u64);

        let mut buf = [0u8; 8];
        assert!(sim.read(1, addr, &mut buf, ReadFlags::CACHED));
        assert_eq!(u64::from_le_bytes(buf), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_dead_process_reads_fail() {
        let sim = SimulatedChannel::new();
        sim.add_process("a.exe", 1);
        sim.add_module(1, "core.dll", RemoteAddress::new(0x4000_0000));
        sim.write_value(RemoteAddress::new(0x2_0000), 1u32);
        sim.kill_process("a.exe");

        let mut buf = [0u8; 4];
        assert!(!sim.read(1, RemoteAddress::new(0x2_0000), &mut buf, ReadFlags::CACHED));
        assert_eq!(sim.find_process("a.exe"), None);
        assert_eq!(sim.module_base(1, "core.dll"), None);
    }

    #[test]
    fn test_failing_address() {
        let sim = SimulatedChannel::new();
        sim.add_process("a.exe", 1);
        sim.write_value(RemoteAddress::new(0x2_0000), 1u64);
        sim.fail_address(RemoteAddress::new(0x2_0004));

        let mut buf = [0u8; 8];
        assert!(!sim.read(1, RemoteAddress::new(0x2_0000), &mut buf, ReadFlags::CACHED));
        let mut head = [0u8; 4];
        assert!(sim.read(1, RemoteAddress::new(0x2_0000), &mut head, ReadFlags::CACHED));
    }

    #[test]
    fn test_volatile_for_settles() {
        let sim = SimulatedChannel::new();
        sim.add_process("a.exe", 1);
        let addr = RemoteAddress::new(0x2_0000);
        sim.write_value(addr, 0u8);
        sim.make_volatile_for(addr, 1, 2);

        let mut b = [0u8; 1];
        let mut seen = Vec::new();
        for _ in 0..4 {
            sim.read(1, addr, &mut b, ReadFlags::FRESH);
            seen.push(b[0]);
        }
        assert_eq!(seen, vec![1, 2, 2, 2]);
        assert_eq!(sim.fresh_reads(), 4);
    }

    #[test]
    fn test_probe() {
        let sim = SimulatedChannel::new();
        assert!(sim.probe().is_ok());
        sim.set_unavailable("no device");
        assert!(matches!(sim.probe(), Err(MemoryError::ChannelUnavailable(_))));
    }
}
