use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use umbra_memory::RemoteAddress;

use super::entity::RemoteEntity;
use crate::sync::{Cancelled, CancellationToken};

/// Outcome of one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Distinct addresses in the observed list.
    pub observed: usize,
    /// Entities constructed and inserted this pass.
    pub added: usize,
    /// Entities removed because they were not observed.
    pub removed: usize,
    /// Candidates whose construction failed (not inserted).
    pub failed: usize,
}

impl ReconcileReport {
    /// True if the pass neither added nor removed anything.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Concurrent map of remote-backed entities keyed by remote address.
///
/// Factories run outside the map's shard locks: a slow hydration never
/// blocks readers of other entities. A per-key gate serializes concurrent
/// construction of the same address.
pub struct EntityRegistry<E> {
    name: &'static str,
    entries: DashMap<RemoteAddress, Arc<E>>,
    pending: DashMap<RemoteAddress, Arc<Mutex<()>>>,
}

impl<E> std::fmt::Debug for EntityRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("name", &self.name)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<E: RemoteEntity> EntityRegistry<E> {
    /// Creates an empty registry; `name` only appears in logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Registry name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, address: RemoteAddress) -> Option<Arc<E>> {
        self.entries.get(&address).map(|entry| Arc::clone(entry.value()))
    }

    /// True if `address` is tracked.
    #[must_use]
    pub fn contains(&self, address: RemoteAddress) -> bool {
        self.entries.contains_key(&address)
    }

    /// Returns the tracked entity, constructing it if absent.
    ///
    /// Concurrent callers for the same key construct exactly once; the
    /// losers wait on that key's gate and get the winner's instance.
    ///
    /// # Errors
    ///
    /// Returns the factory's error; nothing is inserted in that case.
    pub fn get_or_create<F, Err>(&self, address: RemoteAddress, create: F) -> Result<Arc<E>, Err>
    where
        F: FnOnce(RemoteAddress) -> Result<E, Err>,
    {
        if let Some(existing) = self.get(address) {
            return Ok(existing);
        }
        self.construct(address, create).map(|(entity, _)| entity)
    }

    /// Builds the entity for `address` under its gate. The flag is true if
    /// this call inserted it.
    fn construct<F, Err>(&self, address: RemoteAddress, create: F) -> Result<(Arc<E>, bool), Err>
    where
        F: FnOnce(RemoteAddress) -> Result<E, Err>,
    {
        let gate = Arc::clone(self.pending.entry(address).or_default().value());
        let built = {
            let _held = gate.lock();
            match self.get(address) {
                Some(existing) => Ok((existing, false)),
                None => create(address).map(|entity| match self.entries.entry(address) {
                    Entry::Occupied(slot) => (Arc::clone(slot.get()), false),
                    Entry::Vacant(slot) => {
                        let entity = Arc::new(entity);
                        slot.insert(Arc::clone(&entity));
                        (entity, true)
                    }
                }),
            }
        };
        self.pending.remove_if(&address, |_, current| Arc::ptr_eq(current, &gate));
        built
    }

    /// Inserts `entity` under its own address unless one is already tracked.
    ///
    /// Returns true if inserted.
    pub fn insert_if_absent(&self, entity: E) -> bool {
        match self.entries.entry(entity.address()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entity));
                true
            }
        }
    }

    /// Removes and returns an entity.
    pub fn remove(&self, address: RemoteAddress) -> Option<Arc<E>> {
        self.entries.remove(&address).map(|(_, entity)| entity)
    }

    /// Removes every entity not in `observed`. Returns the number removed.
    pub fn sweep(&self, observed: &HashSet<RemoteAddress>) -> usize {
        self.sweep_retaining(observed, |_| false)
    }

    /// Removes every entity not in `observed` unless `keep` says otherwise.
    ///
    /// Used to let dead actors outlive their membership until a separate
    /// cleanup policy removes them.
    pub fn sweep_retaining<K>(&self, observed: &HashSet<RemoteAddress>, keep: K) -> usize
    where
        K: Fn(&E) -> bool,
    {
        let before = self.entries.len();
        self.entries
            .retain(|address, entity| observed.contains(address) || keep(entity));
        before.saturating_sub(self.entries.len())
    }

    /// Removes every entity for which `remove` returns true.
    pub fn remove_where<R>(&self, remove: R) -> usize
    where
        R: Fn(&E) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, entity| !remove(entity));
        before.saturating_sub(self.entries.len())
    }

    /// Full reconciliation pass against a freshly observed membership list.
    ///
    /// Afterwards the key set equals `observed` minus the candidates whose
    /// construction failed. A failing candidate is logged and skipped; it
    /// never aborts the pass.
    pub fn reconcile<I, F, Err>(&self, observed: I, create: F) -> ReconcileReport
    where
        I: IntoIterator<Item = RemoteAddress>,
        F: FnMut(RemoteAddress) -> Result<E, Err>,
        Err: Display,
    {
        match self.reconcile_inner(observed, || false, create) {
            Ok(report) | Err((report, Cancelled)) => report,
        }
    }

    /// [`EntityRegistry::reconcile`] that stops constructing once `token`
    /// fires.
    ///
    /// A cancelled pass keeps what it already built and skips the sweep, so
    /// the registry holds the previous membership plus those additions.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] if the token fired before the sweep.
    pub fn reconcile_cancellable<I, F, Err>(
        &self,
        observed: I,
        token: &CancellationToken,
        create: F,
    ) -> Result<ReconcileReport, Cancelled>
    where
        I: IntoIterator<Item = RemoteAddress>,
        F: FnMut(RemoteAddress) -> Result<E, Err>,
        Err: Display,
    {
        self.reconcile_inner(observed, || token.is_cancelled(), create)
            .map_err(|(_, cancelled)| cancelled)
    }

    fn reconcile_inner<I, C, F, Err>(
        &self,
        observed: I,
        cancelled: C,
        mut create: F,
    ) -> Result<ReconcileReport, (ReconcileReport, Cancelled)>
    where
        I: IntoIterator<Item = RemoteAddress>,
        C: Fn() -> bool,
        F: FnMut(RemoteAddress) -> Result<E, Err>,
        Err: Display,
    {
        let observed: HashSet<RemoteAddress> = observed.into_iter().collect();
        let mut report = ReconcileReport {
            observed: observed.len(),
            ..ReconcileReport::default()
        };

        for &address in &observed {
            if self.contains(address) {
                continue;
            }
            if cancelled() {
                debug!(registry = self.name, added = report.added, "reconcile cancelled before sweep");
                return Err((report, Cancelled));
            }
            match self.construct(address, &mut create) {
                Ok((_, true)) => report.added += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    debug!(registry = self.name, address = %address, "candidate discarded: {e}");
                    report.failed += 1;
                }
            }
        }

        report.removed = self.sweep(&observed);
        if !report.is_unchanged() {
            trace!(
                registry = self.name,
                added = report.added,
                removed = report.removed,
                failed = report.failed,
                "reconciled"
            );
        }
        Ok(report)
    }

    /// Cloned handles to every tracked entity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<E>> {
        self.entries.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Every tracked address.
    #[must_use]
    pub fn addresses(&self) -> Vec<RemoteAddress> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entity.
    pub fn clear(&self) {
        self.entries.clear();
        self.pending.clear();
    }
}
