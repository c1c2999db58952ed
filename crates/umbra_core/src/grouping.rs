//! # Proximity Grouping
//!
//! Tags actors that started close together as one group.
//!
//! ## Algorithm
//!
//! Transitive closure from a seed: take any ungrouped member, then keep
//! absorbing ungrouped members within `threshold` of ANY current group
//! member until nothing more is absorbed. A cluster of one stays ungrouped.
//!
//! If a local node is supplied, its cluster is reported as teammates
//! instead of consuming a group id.
//!
//! Members may already carry a group. A cluster holding known groups keeps
//! the lowest of them, so a late arrival joins the existing group instead of
//! opening a new one.
//!
//! Group ids come from a [`GroupAllocator`] and are never reused within a
//! session.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::math::Vec3;

/// Default clustering distance.
pub const DEFAULT_GROUP_THRESHOLD: f32 = 10.0;

/// Identifier of a group of cooperating actors.
pub type GroupId = u32;

/// Hands out monotonically increasing group ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupAllocator {
    next: GroupId,
}

impl Default for GroupAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl GroupAllocator {
    /// Allocator whose first id follows the highest of `existing`.
    #[must_use]
    pub fn starting_after<I>(existing: I) -> Self
    where
        I: IntoIterator<Item = GroupId>,
    {
        let max = existing.into_iter().max().unwrap_or(0);
        Self {
            next: max.saturating_add(1),
        }
    }

    /// Returns a fresh id.
    pub fn allocate(&mut self) -> GroupId {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }

    /// Id the next call to [`GroupAllocator::allocate`] returns.
    #[must_use]
    pub const fn peek(&self) -> GroupId {
        self.next
    }
}

/// Clusters `members` transitively. Only clusters of two or more are
/// returned, in discovery order.
#[must_use]
pub fn cluster<K: Copy>(members: &[(K, Vec3)], threshold: f32) -> Vec<Vec<K>> {
    let threshold_sq = threshold * threshold;
    let mut ungrouped: BTreeSet<usize> = (0..members.len()).collect();
    let mut clusters = Vec::new();

    while let Some(seed) = ungrouped.pop_first() {
        let mut group = vec![seed];
        let mut frontier = 0;
        while frontier < group.len() {
            let anchor = members[group[frontier]].1;
            let absorbed: Vec<usize> = ungrouped
                .iter()
                .copied()
                .filter(|&i| members[i].1.distance_squared(anchor) <= threshold_sq)
                .collect();
            for i in absorbed {
                ungrouped.remove(&i);
                group.push(i);
            }
            frontier += 1;
        }
        if group.len() >= 2 {
            clusters.push(group.into_iter().map(|i| members[i].0).collect());
        }
    }
    clusters
}

/// Result of [`assign_groups`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupAssignment<K: Eq + Hash> {
    /// Members clustered with the local node.
    pub teammates: Vec<K>,
    /// Members whose group is new or changed, with that group.
    pub groups: HashMap<K, GroupId>,
}

/// Clusters `members` (plus the optional `local` position) and assigns ids.
///
/// `known` returns a member's current group. The cluster containing `local`
/// is reported as teammates, even if it has a single member besides the
/// local node. Every other cluster of two or more keeps the lowest known
/// group among its members, or gets a fresh id from `allocator` if it has
/// none. Members already in the cluster's group are not reported.
pub fn assign_groups<K, G>(
    members: &[(K, Vec3)],
    local: Option<Vec3>,
    threshold: f32,
    known: G,
    allocator: &mut GroupAllocator,
) -> GroupAssignment<K>
where
    K: Copy + Eq + Hash,
    G: Fn(K) -> Option<GroupId>,
{
    let nodes: Vec<(Option<K>, Vec3)> = local
        .map(|pos| (None, pos))
        .into_iter()
        .chain(members.iter().map(|&(k, pos)| (Some(k), pos)))
        .collect();

    let mut assignment = GroupAssignment {
        teammates: Vec::new(),
        groups: HashMap::new(),
    };
    for group in cluster(&nodes, threshold) {
        if group.iter().any(Option::is_none) {
            assignment.teammates.extend(group.into_iter().flatten());
            continue;
        }
        let id = group
            .iter()
            .flatten()
            .filter_map(|&member| known(member))
            .min()
            .unwrap_or_else(|| allocator.allocate());
        for member in group.into_iter().flatten() {
            if known(member) != Some(id) {
                assignment.groups.insert(member, id);
            }
        }
    }
    assignment
}
