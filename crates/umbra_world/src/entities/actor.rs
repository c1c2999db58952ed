//! # Actors
//!
//! One tracked actor. Identity fields are read once at discovery; position,
//! rotation and state are rewritten by refresh loops while consumers read
//! them, so every mutable field is an atomic cell.
//!
//! ## State machine
//!
//! ```text
//! Discovered ──► Active ──┬──► Dead         (corpse pointer set, retained)
//!                         └──► Unreachable  (gone, removed on sweep)
//! ```
//!
//! `Dead` and `Unreachable` are terminal.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use umbra_core::{AtomicVec2, AtomicVec3, GroupId, RemoteEntity, Vec2, Vec3};
use umbra_memory::{read_managed_string, Encoding, MemoryError, RemoteAddress, RemoteMemory};

use crate::context::SessionContext;
use crate::error::MirrorResult;
use crate::layout::{ClassNameLayout, TransformLayout};

/// Who controls the actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActorKind {
    /// The local player.
    Local,
    /// Another human.
    Human,
    /// Computer controlled.
    Ai,
}

/// Lifecycle of a tracked actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActorState {
    /// Hydrated, not yet confirmed by a membership pass.
    Discovered = 0,
    /// Present in the latest membership list.
    Active = 1,
    /// Left the membership list with a corpse.
    Dead = 2,
    /// Left the membership list without a corpse.
    Unreachable = 3,
}

impl ActorState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Discovered,
            1 => Self::Active,
            2 => Self::Dead,
            _ => Self::Unreachable,
        }
    }

    /// True for `Dead` and `Unreachable`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dead | Self::Unreachable)
    }
}

const NO_GROUP: GroupId = 0;

/// Reads the runtime class name of any object.
pub(crate) fn read_class_name(
    memory: &RemoteMemory,
    object: RemoteAddress,
    layout: &ClassNameLayout,
    use_cache: bool,
) -> MirrorResult<String> {
    let name = memory.read_ptr_chain(object, &layout.chain, use_cache)?;
    Ok(memory.read_cstring(name, layout.max_bytes, Encoding::Utf8, use_cache)?)
}

/// Resolves the world-space position cell of a transform.
pub(crate) fn resolve_position_address(
    memory: &RemoteMemory,
    transform: RemoteAddress,
    layout: &TransformLayout,
) -> MirrorResult<RemoteAddress> {
    let hierarchy = memory.read_ptr(transform.offset(layout.hierarchy_offset), false)?;
    let vertices = memory.read_ptr(hierarchy.offset(layout.vertices_offset), false)?;
    let index: i32 = memory.read(transform.offset(layout.index_offset), false)?;
    position_cell(vertices, index, layout)
}

/// Address of vertex `index` in a vertex array.
pub(crate) fn position_cell(vertices: RemoteAddress, index: i32, layout: &TransformLayout) -> MirrorResult<RemoteAddress> {
    u64::try_from(index)
        .ok()
        .and_then(|index| index.checked_mul(layout.vertex_stride))
        .and_then(|offset| vertices.checked_offset(offset))
        .filter(|cell| cell.is_valid())
        .ok_or(MemoryError::InvalidAddress(vertices).into())
}

/// Normalizes a raw (yaw, pitch) pair. Yaw wraps into `0..360`; a pitch
/// outside `-90..=90` or a non-finite value means a garbage read.
#[must_use]
pub fn normalize_rotation(raw: Vec2) -> Option<Vec2> {
    if !raw.is_finite() || !(-90.0..=90.0).contains(&raw.y) {
        return None;
    }
    let yaw = raw.x.rem_euclid(360.0);
    Some(Vec2::new(if yaw >= 360.0 { 0.0 } else { yaw }, raw.y))
}

/// A remote-backed actor.
#[derive(Debug)]
pub struct Actor {
    address: RemoteAddress,
    kind: ActorKind,
    name: String,
    class_name: String,
    side: i32,
    transform: RemoteAddress,
    position_address: AtomicU64,
    rotation_address: RemoteAddress,
    state: AtomicU8,
    position: AtomicVec3,
    rotation: AtomicVec2,
    corpse: AtomicU64,
    died_at: Mutex<Option<Instant>>,
    group: AtomicU32,
    teammate: AtomicBool,
    equipment: RwLock<Vec<String>>,
}

impl RemoteEntity for Actor {
    fn address(&self) -> RemoteAddress {
        self.address
    }
}

impl Actor {
    /// Reads the one-time fields of the actor at `address`.
    ///
    /// # Errors
    ///
    /// Any failed read discards the candidate.
    pub fn hydrate(ctx: &SessionContext, address: RemoteAddress, local: RemoteAddress) -> MirrorResult<Self> {
        if !address.is_valid() {
            return Err(MemoryError::InvalidAddress(address).into());
        }
        let memory = ctx.memory();
        let layout = &ctx.config().layout;
        let actor = &layout.actor;

        let class_name = read_class_name(memory, address, &layout.class_name, true)?;
        let kind = if address == local {
            ActorKind::Local
        } else if memory.read::<u8>(address.offset(actor.is_ai_offset), true)? != 0 {
            ActorKind::Ai
        } else {
            ActorKind::Human
        };
        let name_object = memory.read_ptr(address.offset(actor.name_offset), true)?;
        let name = read_managed_string(memory, name_object, &layout.string, true)?;
        let side: i32 = memory.read(address.offset(actor.side_offset), true)?;

        let transform = memory.read_ptr_chain(address, &actor.transform_chain, true)?;
        let position_address = resolve_position_address(memory, transform, &layout.transform)?;
        let rotation_address = memory
            .read_ptr_chain(address, &actor.rotation_chain, true)?
            .offset(actor.rotation_offset);

        Ok(Self::from_parts(
            address,
            kind,
            name,
            class_name,
            side,
            transform,
            position_address,
            rotation_address,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        address: RemoteAddress,
        kind: ActorKind,
        name: String,
        class_name: String,
        side: i32,
        transform: RemoteAddress,
        position_address: RemoteAddress,
        rotation_address: RemoteAddress,
    ) -> Self {
        Self {
            address,
            kind,
            name,
            class_name,
            side,
            transform,
            position_address: AtomicU64::new(position_address.raw()),
            rotation_address,
            state: AtomicU8::new(ActorState::Discovered as u8),
            position: AtomicVec3::default(),
            rotation: AtomicVec2::default(),
            corpse: AtomicU64::new(0),
            died_at: Mutex::new(None),
            group: AtomicU32::new(NO_GROUP),
            teammate: AtomicBool::new(false),
            equipment: RwLock::new(Vec::new()),
        }
    }

    /// Remote address (identity).
    #[must_use]
    pub const fn address(&self) -> RemoteAddress {
        self.address
    }

    /// Controller.
    #[must_use]
    pub const fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Raw side tag.
    #[must_use]
    pub const fn side(&self) -> i32 {
        self.side
    }

    /// Root transform.
    #[must_use]
    pub const fn transform(&self) -> RemoteAddress {
        self.transform
    }

    /// True for the local player.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.kind == ActorKind::Local
    }

    /// True for humans, local included.
    #[must_use]
    pub fn is_human(&self) -> bool {
        self.kind != ActorKind::Ai
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while not terminal.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.state().is_terminal()
    }

    /// True while in the membership list.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ActorState::Active
    }

    /// Last refreshed position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position.load()
    }

    /// Last refreshed rotation (yaw, pitch).
    #[must_use]
    pub fn rotation(&self) -> Vec2 {
        self.rotation.load()
    }

    /// Corpse object once dead.
    #[must_use]
    pub fn corpse(&self) -> Option<RemoteAddress> {
        let raw = RemoteAddress::new(self.corpse.load(Ordering::Acquire));
        (!raw.is_null()).then_some(raw)
    }

    /// When death was observed.
    #[must_use]
    pub fn died_at(&self) -> Option<Instant> {
        *self.died_at.lock()
    }

    /// True if dead for longer than `retention`.
    #[must_use]
    pub fn corpse_expired(&self, retention: Duration) -> bool {
        self.died_at().is_some_and(|at| at.elapsed() >= retention)
    }

    /// Hostile group, if grouped.
    #[must_use]
    pub fn group_id(&self) -> Option<GroupId> {
        match self.group.load(Ordering::Relaxed) {
            NO_GROUP => None,
            id => Some(id),
        }
    }

    /// True if grouped with the local player.
    #[must_use]
    pub fn is_teammate(&self) -> bool {
        self.teammate.load(Ordering::Relaxed)
    }

    /// Item ids of the last equipment refresh.
    #[must_use]
    pub fn equipment(&self) -> Vec<String> {
        self.equipment.read().clone()
    }

    pub(crate) fn position_address(&self) -> RemoteAddress {
        RemoteAddress::new(self.position_address.load(Ordering::Acquire))
    }

    pub(crate) fn set_position_address(&self, address: RemoteAddress) {
        self.position_address.store(address.raw(), Ordering::Release);
    }

    pub(crate) const fn rotation_address(&self) -> RemoteAddress {
        self.rotation_address
    }

    /// Discovered → Active. Returns false if already terminal.
    pub(crate) fn mark_active(&self) -> bool {
        self.transition(|s| !s.is_terminal(), ActorState::Active)
    }

    /// Alive → Dead with the observed corpse.
    pub(crate) fn mark_dead(&self, corpse: RemoteAddress) -> bool {
        if !self.transition(|s| !s.is_terminal(), ActorState::Dead) {
            return false;
        }
        self.corpse.store(corpse.raw(), Ordering::Release);
        *self.died_at.lock() = Some(Instant::now());
        true
    }

    /// Alive → Unreachable.
    pub(crate) fn mark_unreachable(&self) -> bool {
        self.transition(|s| !s.is_terminal(), ActorState::Unreachable)
    }

    fn transition(&self, allowed: impl Fn(ActorState) -> bool, to: ActorState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                allowed(ActorState::from_u8(raw)).then_some(to as u8)
            })
            .is_ok()
    }

    /// Stores a position unless it is garbage.
    pub(crate) fn set_position(&self, position: Vec3) -> bool {
        if position.is_normal() {
            self.position.store(position);
            true
        } else {
            false
        }
    }

    /// Stores a rotation unless it is garbage.
    pub(crate) fn set_rotation(&self, raw: Vec2) -> bool {
        match normalize_rotation(raw) {
            Some(rotation) => {
                self.rotation.store(rotation);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_group(&self, group: Option<GroupId>) {
        self.group.store(group.unwrap_or(NO_GROUP), Ordering::Relaxed);
    }

    pub(crate) fn set_teammate(&self, teammate: bool) {
        self.teammate.store(teammate, Ordering::Relaxed);
    }

    pub(crate) fn set_equipment(&self, items: Vec<String>) {
        *self.equipment.write() = items;
    }

    #[cfg(test)]
    pub(crate) fn for_test(address: u64, kind: ActorKind, name: &str) -> Self {
        Self::from_parts(
            RemoteAddress::new(address),
            kind,
            name.to_owned(),
            "Player".to_owned(),
            0,
            RemoteAddress::NULL,
            RemoteAddress::NULL,
            RemoteAddress::NULL,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let actor = Actor::for_test(0x10_0000, ActorKind::Human, "a");
        assert_eq!(actor.state(), ActorState::Discovered);
        assert!(actor.is_alive());
        assert!(!actor.is_active());

        assert!(actor.mark_active());
        assert!(actor.is_active());
        assert!(actor.mark_dead(RemoteAddress::new(0x20_0000)));
        assert_eq!(actor.state(), ActorState::Dead);
        assert_eq!(actor.corpse(), Some(RemoteAddress::new(0x20_0000)));
        assert!(actor.died_at().is_some());

        // Terminal states stick.
        assert!(!actor.mark_active());
        assert!(!actor.mark_unreachable());
        assert_eq!(actor.state(), ActorState::Dead);
    }

    #[test]
    fn test_unreachable_is_terminal() {
        let actor = Actor::for_test(0x10_0000, ActorKind::Ai, "b");
        assert!(actor.mark_unreachable());
        assert!(!actor.is_alive());
        assert!(!actor.mark_dead(RemoteAddress::new(0x20_0000)));
        assert_eq!(actor.corpse(), None);
    }

    #[test]
    fn test_corpse_retention() {
        let actor = Actor::for_test(0x10_0000, ActorKind::Human, "c");
        assert!(!actor.corpse_expired(Duration::ZERO));
        actor.mark_dead(RemoteAddress::new(0x20_0000));
        assert!(actor.corpse_expired(Duration::ZERO));
        assert!(!actor.corpse_expired(Duration::from_secs(3600)));
    }

    #[test]
    fn test_rotation_validation() {
        assert_eq!(normalize_rotation(Vec2::new(370.0, 10.0)), Some(Vec2::new(10.0, 10.0)));
        assert_eq!(normalize_rotation(Vec2::new(-90.0, -45.0)), Some(Vec2::new(270.0, -45.0)));
        assert_eq!(normalize_rotation(Vec2::new(10.0, 91.0)), None);
        assert_eq!(normalize_rotation(Vec2::new(f32::NAN, 0.0)), None);

        let actor = Actor::for_test(0x10_0000, ActorKind::Human, "d");
        assert!(actor.set_rotation(Vec2::new(720.0, 0.0)));
        assert_eq!(actor.rotation(), Vec2::new(0.0, 0.0));
        assert!(!actor.set_rotation(Vec2::new(0.0, 200.0)));
    }

    #[test]
    fn test_garbage_position_rejected() {
        let actor = Actor::for_test(0x10_0000, ActorKind::Human, "e");
        assert!(actor.set_position(Vec3::new(1.0, 2.0, 3.0)));
        assert!(!actor.set_position(Vec3::ZERO));
        assert!(!actor.set_position(Vec3::new(f32::INFINITY, 0.0, 0.0)));
        assert_eq!(actor.position(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_group_flags() {
        let actor = Actor::for_test(0x10_0000, ActorKind::Human, "f");
        assert_eq!(actor.group_id(), None);
        actor.set_group(Some(4));
        assert_eq!(actor.group_id(), Some(4));
        actor.set_teammate(true);
        assert!(actor.is_teammate());
    }
}
