//! # Scatter Map
//!
//! Multi-round scatter reads where round N+1's addresses depend on round N's
//! results (e.g. read an object pointer, then read fields of that object).
//!
//! Every round is one channel round trip. Completion callbacks of round N get
//! a `&mut ScatterRound` to plan round N+1; the map stops when a round plans
//! nothing or after [`MAX_SCATTER_ROUNDS`].

use bytemuck::Pod;
use tracing::warn;

use crate::access::RemoteMemory;
use crate::address::RemoteAddress;
use crate::error::MemoryResult;
use crate::scatter::{Plan, ScatterArrayHandle, ScatterHandle, ScatterResults};

/// Hard cap on dependent rounds per [`ScatterMap::execute`].
pub const MAX_SCATTER_ROUNDS: usize = 8;

type RoundCompletion = Box<dyn FnOnce(&ScatterResults, &mut ScatterRound) + Send>;

/// One round of a [`ScatterMap`].
pub struct ScatterRound {
    plan: Plan,
    callbacks: Vec<RoundCompletion>,
}

impl std::fmt::Debug for ScatterRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterRound")
            .field("planned", &self.plan.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Default for ScatterRound {
    fn default() -> Self {
        Self {
            plan: Plan::new(),
            callbacks: Vec::new(),
        }
    }
}

impl ScatterRound {
    /// Plans a single-value read in this round.
    ///
    /// # Errors
    ///
    /// `ReadTooLarge` if `T` exceeds the transfer ceiling.
    pub fn prepare_read<T: Pod>(&mut self, address: RemoteAddress) -> MemoryResult<ScatterHandle<T>> {
        self.plan.prepare_read(address)
    }

    /// Plans an array read in this round.
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

    /// Plans a pointer read in this round.
    ///
    /// # Errors
    ///
    /// Never in practice.
    pub fn prepare_read_ptr(&mut self, address: RemoteAddress) -> MemoryResult<ScatterHandle<RemoteAddress>> {
        self.plan.prepare_read(address)
    }

    /// Registers a callback run when this round completes.
    pub fn on_completed<F>(&mut self, callback: F)
    where
        F: FnOnce(&ScatterResults, &mut ScatterRound) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    fn is_idle(&self) -> bool {
        self.plan.len() == 0 && self.callbacks.is_empty()
    }
}

/// Sequenced dependent scatter rounds executed by a single call.
pub struct ScatterMap {
    memory: RemoteMemory,
    use_cache: bool,
    first: ScatterRound,
}

impl std::fmt::Debug for ScatterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterMap").field("first", &self.first).finish_non_exhaustive()
    }
}

impl ScatterMap {
    /// Creates an empty map with cached reads.
    #[must_use]
    pub fn new(memory: RemoteMemory) -> Self {
        Self {
            memory,
            use_cache: true,
            first: ScatterRound::default(),
        }
    }

    /// Selects cached or fresh reads for every round.
    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// The first round; later rounds are planned from callbacks.
    pub fn round(&mut self) -> &mut ScatterRound {
        &mut self.first
    }

    /// Runs every round in order. Returns the number of round trips made.
    pub fn execute(&mut self) -> usize {
        let mut current = std::mem::take(&mut self.first);
        let mut rounds = 0;

        while !current.is_idle() {
            if rounds == MAX_SCATTER_ROUNDS {
                warn!(
                    pending = current.plan.len(),
                    "scatter map exceeded {MAX_SCATTER_ROUNDS} rounds, dropping the rest"
                );
                break;
            }
            rounds += 1;

            let callbacks = std::mem::take(&mut current.callbacks);
            let results = current.plan.run(&self.memory, self.use_cache);
            let mut next = ScatterRound::default();
            for callback in callbacks {
                callback(&results, &mut next);
            }
            current = next;
        }
        rounds
    }
}
