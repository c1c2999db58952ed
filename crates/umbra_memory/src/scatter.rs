//! # Scatter Batch
//!
//! Planned reads submitted as ONE channel round trip.
//!
//! Pointer-chasing through dozens of small remote objects is latency bound.
//! A batch accumulates the reads a refresh cycle needs, hits the channel
//! once, then hands each completion callback a [`ScatterResults`] view.
//!
//! ## Lifecycle
//!
//! ```text
//! prepare_read() ... on_completed() ... execute() ──► callbacks ──► reset
//! ```
//!
//! Handles are typed and only resolve against the results of the batch
//! execution that produced them. A handle from an earlier cycle, or one
//! whose individual read failed, resolves to `None`.
//!
//! A batch is driven by one loop at a time. Unrelated batches share nothing.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use tracing::trace;

use crate::access::{array_len, check_size, RemoteMemory, MAX_READ_SIZE};
use crate::address::RemoteAddress;
use crate::channel::{ReadFlags, ScatterSlot};
use crate::error::MemoryResult;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Typed reference to one planned single-value read.
pub struct ScatterHandle<T> {
    generation: u64,
    index: usize,
    address: RemoteAddress,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScatterHandle<T> {
    /// Address this handle reads.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }
}

impl<T> Clone for ScatterHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScatterHandle<T> {}

impl<T> std::fmt::Debug for ScatterHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterHandle")
            .field("address", &self.address)
            .field("index", &self.index)
            .finish()
    }
}

/// Typed reference to one planned array read.
pub struct ScatterArrayHandle<T> {
    generation: u64,
    index: usize,
    count: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScatterArrayHandle<T> {
    /// Number of elements requested.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }
}

impl<T> Clone for ScatterArrayHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScatterArrayHandle<T> {}

/// Slot table shared by [`ScatterBatch`] and the rounds of a scatter map.
#[derive(Debug)]
pub(crate) struct Plan {
    generation: u64,
    slots: Vec<ScatterSlot>,
    index: HashMap<(RemoteAddress, usize), usize>,
}

impl Plan {
    pub(crate) fn new() -> Self {
        Self {
            generation: next_generation(),
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn slot(&mut self, address: RemoteAddress, len: usize) -> MemoryResult<usize> {
        check_size(len, MAX_READ_SIZE)?;
        let slots = &mut self.slots;
        Ok(*self.index.entry((address, len)).or_insert_with(|| {
            slots.push(ScatterSlot::new(address, len));
            slots.len() - 1
        }))
    }

    pub(crate) fn prepare_read<T: Pod>(&mut self, address: RemoteAddress) -> MemoryResult<ScatterHandle<T>> {
        let index = self.slot(address, std::mem::size_of::<T>())?;
        Ok(ScatterHandle {
            generation: self.generation,
            index,
            address,
            _marker: PhantomData,
        })
    }

    pub(crate) fn prepare_read_array<T: Pod>(
        &mut self,
        address: RemoteAddress,
        count: usize,
    ) -> MemoryResult<ScatterArrayHandle<T>> {
        let index = self.slot(address, array_len::<T>(count)?)?;
        Ok(ScatterArrayHandle {
            generation: self.generation,
            index,
            count,
            _marker: PhantomData,
        })
    }

    /// Performs the round trip (if anything is planned) and resets the plan.
    pub(crate) fn run(&mut self, memory: &RemoteMemory, use_cache: bool) -> ScatterResults {
        let mut slots = std::mem::take(&mut self.slots);
        let index = std::mem::take(&mut self.index);
        let generation = std::mem::replace(&mut self.generation, next_generation());

        if !slots.is_empty() {
            let flags = ReadFlags::from_use_cache(use_cache);
            if slots.iter().all(|slot| slot.address.is_valid()) {
                memory.channel().read_scatter(memory.pid(), &mut slots, flags);
            } else {
                // Invalid addresses never reach the channel.
                let valid: Vec<usize> = (0..slots.len())
                    .filter(|&i| slots[i].address.is_valid())
                    .collect();
                if !valid.is_empty() {
                    let mut subset: Vec<ScatterSlot> = valid.iter().map(|&i| slots[i].clone()).collect();
                    memory.channel().read_scatter(memory.pid(), &mut subset, flags);
                    for (i, slot) in valid.into_iter().zip(subset) {
                        slots[i] = slot;
                    }
                }
            }
            trace!(
                slots = slots.len(),
                failed = slots.iter().filter(|s| !s.ok).count(),
                "scatter round trip"
            );
        }

        ScatterResults {
            generation,
            slots,
            index,
        }
    }
}

/// Resolved buffers of one executed batch.
#[derive(Debug)]
pub struct ScatterResults {
    generation: u64,
    slots: Vec<ScatterSlot>,
    index: HashMap<(RemoteAddress, usize), usize>,
}

impl ScatterResults {
    fn resolved(&self, generation: u64, index: usize) -> Option<&[u8]> {
        if generation != self.generation {
            return None;
        }
        self.slots
            .get(index)
            .filter(|slot| slot.ok)
            .map(|slot| slot.buf.as_slice())
    }

    /// Value of a planned read, or `None` if that read failed.
    #[must_use]
    pub fn get<T: Pod>(&self, handle: &ScatterHandle<T>) -> Option<T> {
        let bytes = self.resolved(handle.generation, handle.index)?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    /// Pointer value of a planned read, filtered to user space.
    #[must_use]
    pub fn get_ptr(&self, handle: &ScatterHandle<RemoteAddress>) -> Option<RemoteAddress> {
        self.get(handle).filter(|ptr| ptr.is_valid())
    }

    /// Elements of a planned array read, or `None` if that read failed.
    #[must_use]
    pub fn get_array<T: Pod>(&self, handle: &ScatterArrayHandle<T>) -> Option<Vec<T>> {
        let bytes = self.resolved(handle.generation, handle.index)?;
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Some(vec![T::zeroed(); handle.count]);
        }
        Some(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
    }

    /// Value keyed by address, for callbacks that did not keep a handle.
    #[must_use]
    pub fn read<T: Pod>(&self, address: RemoteAddress) -> Option<T> {
        let index = *self.index.get(&(address, std::mem::size_of::<T>()))?;
        self.resolved(self.generation, index)
            .and_then(|bytes| bytemuck::try_pod_read_unaligned(bytes).ok())
    }

    /// Whether the read behind `handle` succeeded.
    #[must_use]
    pub fn succeeded<T>(&self, handle: &ScatterHandle<T>) -> bool {
        self.resolved(handle.generation, handle.index).is_some()
    }

    /// Number of distinct reads performed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of individual reads that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.ok).count()
    }
}

type Completion = Box<dyn FnOnce(&ScatterResults) + Send>;

/// Accumulator of planned reads executed as one round trip.
pub struct ScatterBatch {
    memory: RemoteMemory,
    use_cache: bool,
    plan: Plan,
    callbacks: Vec<Completion>,
}

impl std::fmt::Debug for ScatterBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterBatch")
            .field("planned", &self.plan.len())
            .field("callbacks", &self.callbacks.len())
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

impl ScatterBatch {
    /// Creates an empty batch with cached reads.
    #[must_use]
    pub fn new(memory: RemoteMemory) -> Self {
        Self {
            memory,
            use_cache: true,
            plan: Plan::new(),
            callbacks: Vec::new(),
        }
    }

    /// Selects cached or fresh reads for every execution of this batch.
    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Plans a single-value read. No I/O happens.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` if `T` exceeds the transfer ceiling.
    pub fn prepare_read<T: Pod>(&mut self, address: RemoteAddress) -> MemoryResult<ScatterHandle<T>> {
        self.plan.prepare_read(address)
    }

    /// Plans a read of `count` contiguous values.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` if the array exceeds the transfer ceiling.
    pub fn prepare_read_array<T: Pod>(
        &mut self,
        address: RemoteAddress,
        count: usize,
    ) -> MemoryResult<ScatterArrayHandle<T>> {
        self.plan.prepare_read_array(address, count)
    }

    /// Plans a pointer read; resolve with [`ScatterResults::get_ptr`].
    ///
    /// # Errors
    ///
    /// Never in practice; kept fallible for symmetry.
    pub fn prepare_read_ptr(&mut self, address: RemoteAddress) -> MemoryResult<ScatterHandle<RemoteAddress>> {
        self.plan.prepare_read(address)
    }

    /// Registers a callback run after the next [`ScatterBatch::execute`].
    pub fn on_completed<F>(&mut self, callback: F)
    where
        F: FnOnce(&ScatterResults) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Number of distinct reads planned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    /// True if no read is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plan.len() == 0
    }

    /// Performs one round trip, runs every callback, and resets the batch.
    pub fn execute(&mut self) -> ScatterResults {
        let callbacks = std::mem::take(&mut self.callbacks);
        let results = self.plan.run(&self.memory, self.use_cache);
        for callback in callbacks {
            callback(&results);
        }
        results
    }
}
