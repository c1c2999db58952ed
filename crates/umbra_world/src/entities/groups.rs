//! # Group Tracking
//!
//! Tags actors that spawned close together. Assignments are persisted per
//! target process through a [`RelationshipStore`] so a re-attach to the same
//! process restores them, and fresh ids always start after the highest id
//! already stored.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use umbra_core::{assign_groups, GroupAllocator, GroupId};
use umbra_memory::ProcessId;

use super::actor::Actor;

/// Observed relationships of one process: actor name → group.
pub type Relationships = HashMap<String, GroupId>;

/// Key-value persistence owned by the configuration collaborator.
pub trait RelationshipStore: Send + Sync {
    /// Relationships recorded for `pid` (empty if none).
    fn load(&self, pid: ProcessId) -> Relationships;

    /// Replaces the relationships recorded for `pid`.
    fn save(&self, pid: ProcessId, relationships: &Relationships);
}

/// Process-local store. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    entries: Mutex<HashMap<ProcessId, Relationships>>,
}

impl InMemoryRelationshipStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn load(&self, pid: ProcessId) -> Relationships {
        self.entries.lock().get(&pid).cloned().unwrap_or_default()
    }

    fn save(&self, pid: ProcessId, relationships: &Relationships) {
        self.entries.lock().insert(pid, relationships.clone());
    }
}

/// Per-world grouping state.
pub struct GroupTracker {
    pid: ProcessId,
    threshold: f32,
    store: Arc<dyn RelationshipStore>,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    allocator: GroupAllocator,
    relationships: Relationships,
}

impl std::fmt::Debug for GroupTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTracker")
            .field("pid", &self.pid)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl GroupTracker {
    /// Loads stored relationships for `pid`.
    #[must_use]
    pub fn new(pid: ProcessId, threshold: f32, store: Arc<dyn RelationshipStore>) -> Self {
        let relationships = store.load(pid);
        let allocator = GroupAllocator::starting_after(relationships.values().copied());
        Self {
            pid,
            threshold,
            store,
            state: Mutex::new(TrackerState {
                allocator,
                relationships,
            }),
        }
    }

    /// Stored group of `name`.
    #[must_use]
    pub fn stored_group(&self, name: &str) -> Option<GroupId> {
        self.state.lock().relationships.get(name).copied()
    }

    /// Id the next new group receives.
    #[must_use]
    pub fn next_group_id(&self) -> GroupId {
        self.state.lock().allocator.peek()
    }

    /// One grouping pass.
    ///
    /// Actors with a stored group get it back. Active non-local humans are
    /// then clustered together with the local player: the local cluster is
    /// flagged as teammates, a cluster holding a stored group keeps it (so a
    /// late arrival joins), and any other cluster of two or more gets a fresh
    /// id. Actors whose position was never read wait for a later pass.
    /// Returns the number of actors whose grouping changed.
    pub fn refresh(&self, actors: &[Arc<Actor>]) -> usize {
        let local = actors
            .iter()
            .find(|a| a.is_local() && a.is_alive())
            .map(|a| a.position())
            .filter(|p| p.is_normal());
        let mut state = self.state.lock();

        let mut candidates = Vec::new();
        for (index, actor) in actors.iter().enumerate() {
            if actor.is_local() || !actor.is_human() || !actor.is_active() || actor.is_teammate() {
                continue;
            }
            if let Some(&group) = state.relationships.get(actor.name()) {
                actor.set_group(Some(group));
            }
            if actor.position().is_normal() {
                candidates.push((index, actor.position()));
            }
        }
        if candidates.is_empty() {
            return 0;
        }

        let TrackerState {
            allocator,
            relationships,
        } = &mut *state;
        let known = |index: usize| relationships.get(actors[index].name()).copied();
        let assignment = assign_groups(&candidates, local, self.threshold, known, allocator);

        for index in &assignment.teammates {
            actors[*index].set_teammate(true);
        }
        for (index, group) in &assignment.groups {
            let actor = &actors[*index];
            actor.set_group(Some(*group));
            relationships.insert(actor.name().to_owned(), *group);
        }

        let grouped = assignment.teammates.len() + assignment.groups.len();
        if !assignment.groups.is_empty() {
            debug!(pid = self.pid, changed = assignment.groups.len(), "groups assigned");
            self.store.save(self.pid, relationships);
        }
        grouped
    }
}
