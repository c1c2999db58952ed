//! World discovery through the object manager.
//!
//! ```text
//! module_base + manager_offset ──▶ manager
//!   manager.first ──▶ node ──next──▶ node ──next──▶ ... ──▶ manager.last
//!                      │
//!                      └─object──▶ name ptr ──▶ "GameWorld"
//!                                   └─object_chain──▶ world
//! ```

use tracing::trace;
use umbra_memory::{read_managed_string, Encoding, RemoteAddress, RemoteMemory};

use crate::context::SessionContext;
use crate::error::{MirrorError, MirrorResult};
use crate::layout::ObjectListLayout;

/// Walks the object manager list for the object named
/// `world_object_name`.
///
/// # Errors
///
/// A failed read of the manager header, or `WorldNotFound` if no node
/// within `max_scan` carries the name.
pub fn find_world_object(ctx: &SessionContext) -> MirrorResult<RemoteAddress> {
    let memory = ctx.memory();
    let layout = &ctx.config().layout.objects;
    let manager = ctx.session().object_manager;

    let first = memory.read_ptr(manager.offset(layout.first_node_offset), false)?;
    let last = memory.read_ptr(manager.offset(layout.last_node_offset), false)?;

    let mut node = first;
    for scanned in 0..layout.max_scan {
        if let Ok(object) = memory.read_ptr(node.offset(layout.node_object_offset), false) {
            if object_name(memory, object, layout).is_ok_and(|name| name == layout.world_object_name) {
                trace!(object = %object, scanned, "world object found");
                return Ok(object);
            }
        }
        if node == last {
            break;
        }
        node = match memory.read_ptr(node.offset(layout.node_next_offset), false) {
            Ok(next) => next,
            Err(_) => break,
        };
    }
    Err(MirrorError::WorldNotFound(format!(
        "no '{}' object registered",
        layout.world_object_name
    )))
}

fn object_name(memory: &RemoteMemory, object: RemoteAddress, layout: &ObjectListLayout) -> MirrorResult<String> {
    let name = memory.read_ptr(object.offset(layout.object_name_offset), true)?;
    Ok(memory.read_cstring(name, layout.name_max_bytes, Encoding::Utf8, true)?)
}

/// Follows the world chain from the game object.
///
/// # Errors
///
/// Any failed link.
pub fn resolve_world(ctx: &SessionContext, game_object: RemoteAddress) -> MirrorResult<RemoteAddress> {
    let chain = &ctx.config().layout.world.object_chain;
    Ok(ctx.memory().read_ptr_chain(game_object, chain, false)?)
}

/// Reads and checks the world's map identifier.
///
/// # Errors
///
/// A failed read, or `WorldNotFound` for an empty or unknown id (the world
/// is still loading).
pub fn read_map_id(ctx: &SessionContext, world: RemoteAddress) -> MirrorResult<String> {
    let memory = ctx.memory();
    let config = ctx.config();
    let string = memory.read_ptr(world.offset(config.layout.world.map_id_offset), false)?;
    let map_id = read_managed_string(memory, string, &config.layout.string, false)?;

    if map_id.is_empty() {
        return Err(MirrorError::WorldNotFound("map id not set yet".to_owned()));
    }
    if !config.known_maps.is_empty() && !config.known_maps.iter().any(|m| *m == map_id) {
        return Err(MirrorError::WorldNotFound(format!("unknown map '{map_id}'")));
    }
    Ok(map_id)
}
