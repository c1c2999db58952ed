//! # Remote Layout
//!
//! Every offset the mirror follows inside the target process. Nothing in
//! the refresh logic hard-codes an offset; target updates only touch this
//! table (usually through the `[layout]` section of the config file).
//!
//! Pointer chains are lists of offsets: `[a, b]` from object `o` means
//! `*(*(o + a) + b)`.

use serde::{Deserialize, Serialize};
use umbra_memory::{ListLayout, StringLayout};

/// Full remote layout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLayout {
    /// Growable list layout shared by every remote list.
    pub list: ListLayout,
    /// Length-prefixed string layout.
    pub string: StringLayout,
    /// Runtime class-name lookup.
    pub class_name: ClassNameLayout,
    /// Object manager linked list.
    pub objects: ObjectListLayout,
    /// World object fields.
    pub world: WorldLayout,
    /// Transform hierarchy.
    pub transform: TransformLayout,
    /// Actor fields.
    pub actor: ActorLayout,
    /// Grenade and tripwire fields.
    pub explosives: ExplosivesLayout,
    /// Loose loot fields.
    pub loot: LootLayout,
    /// Quest progress fields.
    pub quests: QuestLayout,
}

/// Runtime class name of any object: `*(*(obj + chain..))` is a UTF-8 C string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassNameLayout {
    /// Chain from the object to the name characters.
    pub chain: Vec<u64>,
    /// Longest name read.
    pub max_bytes: usize,
}

impl Default for ClassNameLayout {
    fn default() -> Self {
        Self {
            chain: vec![0x0, 0x48],
            max_bytes: 64,
        }
    }
}

/// Object manager: a doubly linked list of live game objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectListLayout {
    /// Module-relative offset of the object manager pointer.
    pub manager_offset: u64,
    /// Offset of the first active node pointer in the manager.
    pub first_node_offset: u64,
    /// Offset of the last active node pointer in the manager.
    pub last_node_offset: u64,
    /// Offset of the next-node pointer in a node.
    pub node_next_offset: u64,
    /// Offset of the object pointer in a node.
    pub node_object_offset: u64,
    /// Offset of the name pointer in an object.
    pub object_name_offset: u64,
    /// Name of the object that owns the world.
    pub world_object_name: String,
    /// Longest object name read.
    pub name_max_bytes: usize,
    /// Nodes walked before giving up.
    pub max_scan: usize,
}

impl Default for ObjectListLayout {
    fn default() -> Self {
        Self {
            manager_offset: 0x17F_FD28,
            first_node_offset: 0x20,
            last_node_offset: 0x28,
            node_next_offset: 0x8,
            node_object_offset: 0x10,
            object_name_offset: 0x60,
            world_object_name: "GameWorld".to_owned(),
            name_max_bytes: 64,
            max_scan: 10_000,
        }
    }
}

/// World instance fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldLayout {
    /// Chain from the game object to the world instance.
    pub object_chain: Vec<u64>,
    /// Offset of the map id string pointer.
    pub map_id_offset: u64,
    /// Offset of the local actor pointer.
    pub main_actor_offset: u64,
    /// Offset of the registered actors list pointer.
    pub actors_offset: u64,
    /// Offset of the loose loot list pointer.
    pub loot_offset: u64,
    /// Chain from the world to the grenades list.
    pub grenades_chain: Vec<u64>,
    /// Chain from the world to the synchronizable objects list.
    pub sync_objects_chain: Vec<u64>,
}

impl Default for WorldLayout {
    fn default() -> Self {
        Self {
            object_chain: vec![0x30, 0x18, 0x28],
            map_id_offset: 0xC8,
            main_actor_offset: 0x148,
            actors_offset: 0x120,
            loot_offset: 0xC0,
            grenades_chain: vec![0x1A0, 0x18],
            sync_objects_chain: vec![0x1D0, 0x18],
        }
    }
}

/// Transform hierarchy: world position of a transform lives in the
/// hierarchy's vertex array at the transform's index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformLayout {
    /// Offset of the hierarchy pointer in a transform.
    pub hierarchy_offset: u64,
    /// Offset of the vertex array pointer in a hierarchy.
    pub vertices_offset: u64,
    /// Offset of the vertex index (i32) in a transform.
    pub index_offset: u64,
    /// Bytes per vertex; the position is the vertex's first 12 bytes.
    pub vertex_stride: u64,
}

impl Default for TransformLayout {
    fn default() -> Self {
        Self {
            hierarchy_offset: 0x70,
            vertices_offset: 0x68,
            index_offset: 0x78,
            vertex_stride: 0x30,
        }
    }
}

/// Actor fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorLayout {
    /// Offset of the is-AI flag (u8).
    pub is_ai_offset: u64,
    /// Offset of the display name string pointer.
    pub name_offset: u64,
    /// Offset of the side tag (i32).
    pub side_offset: u64,
    /// Offset of the corpse pointer; non-null once dead.
    pub corpse_offset: u64,
    /// Chain from the actor to its root transform.
    pub transform_chain: Vec<u64>,
    /// Chain from the actor to the object holding its rotation.
    pub rotation_chain: Vec<u64>,
    /// Offset of the rotation (yaw, pitch) in that object.
    pub rotation_offset: u64,
    /// Chain from the actor to its equipment item list.
    pub equipment_chain: Vec<u64>,
    /// Chain from an item to its id string.
    pub item_id_chain: Vec<u64>,
    /// Offset of the profile pointer.
    pub profile_offset: u64,
    /// Offset of the hands controller pointer.
    pub hands_controller_offset: u64,
    /// Substring every valid hands controller class name contains.
    pub hands_class_marker: String,
    /// Hands controller class of a player who has not drawn anything yet;
    /// any other controller means the raid has started.
    pub empty_hands_class: String,
    /// Side tag of scavs.
    pub scav_side: i32,
}

impl Default for ActorLayout {
    fn default() -> Self {
        Self {
            is_ai_offset: 0xA0,
            name_offset: 0x40,
            side_offset: 0x94,
            corpse_offset: 0x680,
            transform_chain: vec![0x190, 0x30],
            rotation_chain: vec![0x60],
            rotation_offset: 0xC8,
            equipment_chain: vec![0x28, 0x90],
            item_id_chain: vec![0x60, 0xE0],
            profile_offset: 0x900,
            hands_controller_offset: 0x980,
            hands_class_marker: "Controller".to_owned(),
            empty_hands_class: "ClientEmptyHandsController".to_owned(),
            scav_side: 4,
        }
    }
}

/// Grenade and tripwire fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplosivesLayout {
    /// Class-name fragment marking smoke grenades.
    pub smoke_class_marker: String,
    /// Offset of the grenade destroyed flag (u8).
    pub destroyed_offset: u64,
    /// Chain from a grenade to its transform.
    pub grenade_transform_chain: Vec<u64>,
    /// Offset of the synchronizable object type tag (i32).
    pub sync_type_offset: u64,
    /// Type tag value of a tripwire.
    pub tripwire_type: i32,
    /// Offset of the tripwire state (i32).
    pub tripwire_state_offset: u64,
    /// Offset of the tripwire position.
    pub tripwire_position_offset: u64,
}

impl Default for ExplosivesLayout {
    fn default() -> Self {
        Self {
            smoke_class_marker: "SmokeGrenade".to_owned(),
            destroyed_offset: 0x4D,
            grenade_transform_chain: vec![0x10, 0x30],
            sync_type_offset: 0x58,
            tripwire_type: 2,
            tripwire_state_offset: 0xE4,
            tripwire_position_offset: 0x158,
        }
    }
}

/// Loose loot fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootLayout {
    /// Chain from a loot object to its item id string.
    pub item_id_chain: Vec<u64>,
    /// Chain from a loot object to its transform.
    pub transform_chain: Vec<u64>,
}

impl Default for LootLayout {
    fn default() -> Self {
        Self {
            item_id_chain: vec![0xF0, 0x60, 0xE0],
            transform_chain: vec![0x10, 0x30],
        }
    }
}

/// Quest progress fields, relative to the local actor's profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestLayout {
    /// Offset of the quest status list pointer in the profile.
    pub data_offset: u64,
    /// Offset of the quest id string pointer in a status entry.
    pub id_offset: u64,
    /// Offset of the status (i32) in a status entry.
    pub status_offset: u64,
    /// Offset of the completed-condition id list pointer in a status entry.
    pub completed_offset: u64,
    /// Status value of a started quest.
    pub started_status: i32,
}

impl Default for QuestLayout {
    fn default() -> Self {
        Self {
            data_offset: 0x98,
            id_offset: 0x10,
            status_offset: 0x1C,
            completed_offset: 0x28,
            started_status: 2,
        }
    }
}
