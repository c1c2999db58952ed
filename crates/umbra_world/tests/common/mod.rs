//! A fake target process laid out in a `SimulatedChannel` exactly as the
//! default `RemoteLayout` expects it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use umbra_core::{Vec2, Vec3};
use umbra_memory::{AcquisitionChannel, ProcessId, RemoteAddress, RemoteMemory, SimulatedChannel};
use umbra_world::entities::{InMemoryRelationshipStore, QuestCatalog, RelationshipStore};
use umbra_world::{LifecycleEvent, Mirror, MirrorConfig, RemoteLayout, Session, SessionContext};

pub const PID: ProcessId = 4242;
pub const MODULE_BASE: RemoteAddress = RemoteAddress::new(0x7FF6_0000_0000);
pub const MAP: &str = "factory";

/// Upper bound for anything the lifecycle thread has to get done.
pub const TIMEOUT: Duration = Duration::from_secs(5);

const PAGE: u64 = 0x1000;
const HEAP_START: u64 = 0x1000_0000;

/// Config with every cadence shrunk to a few milliseconds.
pub fn fast_config() -> MirrorConfig {
    let mut config = MirrorConfig::default();
    config.cadence.realtime_ms = 2;
    config.cadence.slow_ms = 5;
    config.cadence.explosives_ms = 5;
    config.cadence.monitor_ms = 5;
    config.cadence.attach_backoff_ms = 5;
    config.cadence.world_poll_ms = 5;
    config.cadence.teardown_ms = 1;
    config.cadence.quest_refresh_ms = 0;
    config.retry.raid_check_attempts = 3;
    config.retry.raid_check_delay_ms = 1;
    config.retry.process_check_attempts = 2;
    config.retry.process_check_delay_ms = 1;
    config
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Drains every event currently buffered.
pub fn drain(events: &Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    events.try_iter().collect()
}

/// Receives until an event matching `want` arrives; returns everything seen.
pub fn collect_until(
    events: &Receiver<LifecycleEvent>,
    timeout: Duration,
    want: impl Fn(&LifecycleEvent) -> bool,
) -> Option<Vec<LifecycleEvent>> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) => {
                let done = want(&event);
                seen.push(event);
                if done {
                    return Some(seen);
                }
            }
            Err(_) => return None,
        }
    }
    None
}

/// Number of events matching `want`.
pub fn count(events: &[LifecycleEvent], want: impl Fn(&LifecycleEvent) -> bool) -> usize {
    events.iter().filter(|e| want(e)).count()
}

/// Starts a mirror over `target`'s channel.
pub fn start_mirror(target: &FakeTarget, config: MirrorConfig, store: Arc<dyn RelationshipStore>) -> Mirror {
    let channel: Arc<dyn AcquisitionChannel> = target.sim.clone();
    Mirror::start(channel, config, QuestCatalog::default(), store).expect("mirror starts")
}

#[derive(Clone, Copy, Debug)]
pub struct FakeActor {
    pub address: RemoteAddress,
    pub position_cell: RemoteAddress,
    pub rotation_cell: RemoteAddress,
    pub equipment_list: RemoteAddress,
    pub profile: RemoteAddress,
}

#[derive(Clone, Copy, Debug)]
pub struct FakeWorld {
    pub game_object: RemoteAddress,
    pub address: RemoteAddress,
    pub actors_list: RemoteAddress,
    pub loot_list: RemoteAddress,
    pub grenades_list: RemoteAddress,
    pub sync_list: RemoteAddress,
}

/// Bump-allocated remote heap plus helpers that write remote objects.
pub struct FakeTarget {
    pub sim: Arc<SimulatedChannel>,
    pub layout: RemoteLayout,
    pub manager: RemoteAddress,
    next: AtomicU64,
}

impl FakeTarget {
    pub fn new() -> Self {
        let sim = Arc::new(SimulatedChannel::new());
        let target = Self {
            sim,
            layout: RemoteLayout::default(),
            manager: RemoteAddress::NULL,
            next: AtomicU64::new(HEAP_START),
        };
        let manager = target.alloc();
        Self { manager, ..target }
    }

    /// One zeroed, mapped page.
    pub fn alloc(&self) -> RemoteAddress {
        let address = RemoteAddress::new(self.next.fetch_add(PAGE, Ordering::Relaxed));
        self.sim.map(address, PAGE as usize);
        address
    }

    pub fn write<T: bytemuck::Pod>(&self, address: RemoteAddress, value: T) {
        self.sim.write_value(address, value);
    }

    pub fn write_ptr(&self, address: RemoteAddress, target: RemoteAddress) {
        self.sim.write_value(address, target.raw());
    }

    /// Follows `chain` from `object`, allocating every missing link, and
    /// returns the final object.
    pub fn chain(&self, object: RemoteAddress, chain: &[u64]) -> RemoteAddress {
        let mut current = object;
        for &offset in chain {
            let existing = self.sim.peek::<u64>(current.offset(offset)).unwrap_or(0);
            current = if existing == 0 {
                let next = self.alloc();
                self.write_ptr(current.offset(offset), next);
                next
            } else {
                RemoteAddress::new(existing)
            };
        }
        current
    }

    /// Length-prefixed UTF-16 string object.
    pub fn string(&self, text: &str) -> RemoteAddress {
        let object = self.alloc();
        let units: Vec<u16> = text.encode_utf16().collect();
        self.write(object.offset(self.layout.string.length_offset), units.len() as i32);
        self.sim
            .write_slice(object.offset(self.layout.string.chars_offset), &units);
        object
    }

    /// Null-terminated UTF-8 string.
    pub fn cstring(&self, text: &str) -> RemoteAddress {
        let object = self.alloc();
        self.sim.write_bytes(object, text.as_bytes());
        object
    }

    /// Object whose runtime class name is `class`.
    pub fn classed(&self, class: &str) -> RemoteAddress {
        let object = self.alloc();
        let chain = &self.layout.class_name.chain;
        let (last, links) = chain.split_last().expect("class chain");
        let holder = self.chain(object, links);
        self.write_ptr(holder.offset(*last), self.cstring(class));
        object
    }

    /// Growable list holding `items`.
    pub fn list(&self, items: &[RemoteAddress]) -> RemoteAddress {
        let list = self.alloc();
        let array = self.alloc();
        self.write_ptr(list.offset(self.layout.list.items_offset), array);
        self.set_list(list, items);
        list
    }

    pub fn set_list(&self, list: RemoteAddress, items: &[RemoteAddress]) {
        let layout = self.layout.list;
        let array = RemoteAddress::new(self.sim.peek::<u64>(list.offset(layout.items_offset)).expect("list"));
        let raw: Vec<u64> = items.iter().map(|a| a.raw()).collect();
        self.sim.write_slice(array.offset(layout.first_element_offset), &raw);
        self.write(list.offset(layout.count_offset), items.len() as i32);
    }

    /// Transform whose position cell holds `position`; returns (transform, cell).
    pub fn transform(&self, position: Vec3) -> (RemoteAddress, RemoteAddress) {
        let layout = self.layout.transform;
        let transform = self.alloc();
        let hierarchy = self.alloc();
        let vertices = self.alloc();
        let index = 2i32;
        self.write_ptr(transform.offset(layout.hierarchy_offset), hierarchy);
        self.write(transform.offset(layout.index_offset), index);
        self.write_ptr(hierarchy.offset(layout.vertices_offset), vertices);
        let cell = vertices.offset(index as u64 * layout.vertex_stride);
        self.write(cell, position);
        (transform, cell)
    }

    /// Starts the process with its module and object manager.
    pub fn start_process(&self, pid: ProcessId, config: &MirrorConfig) {
        self.sim.add_process(&config.process_name, pid);
        self.sim.add_module(pid, &config.module_name, MODULE_BASE);
        self.write_ptr(MODULE_BASE.offset(self.layout.objects.manager_offset), self.manager);
    }

    /// Registers a loaded world: a decoy node followed by the world node.
    pub fn spawn_world(&self, map: &str) -> FakeWorld {
        let objects = &self.layout.objects;
        let world_layout = &self.layout.world;

        let decoy = self.alloc();
        self.write_ptr(decoy.offset(objects.object_name_offset), self.cstring("Camera"));
        let game_object = self.alloc();
        self.write_ptr(game_object.offset(objects.object_name_offset), self.cstring(&objects.world_object_name));

        let decoy_node = self.alloc();
        let world_node = self.alloc();
        self.write_ptr(decoy_node.offset(objects.node_object_offset), decoy);
        self.write_ptr(decoy_node.offset(objects.node_next_offset), world_node);
        self.write_ptr(world_node.offset(objects.node_object_offset), game_object);
        self.write_ptr(self.manager.offset(objects.first_node_offset), decoy_node);
        self.write_ptr(self.manager.offset(objects.last_node_offset), world_node);

        let address = self.chain(game_object, &world_layout.object_chain);
        self.write_ptr(address.offset(world_layout.map_id_offset), self.string(map));

        let actors_list = self.list(&[]);
        self.write_ptr(address.offset(world_layout.actors_offset), actors_list);
        let loot_list = self.list(&[]);
        self.write_ptr(address.offset(world_layout.loot_offset), loot_list);

        let (last, links) = world_layout.grenades_chain.split_last().expect("grenades chain");
        let grenades_list = self.list(&[]);
        self.write_ptr(self.chain(address, links).offset(*last), grenades_list);
        let (last, links) = world_layout.sync_objects_chain.split_last().expect("sync chain");
        let sync_list = self.list(&[]);
        self.write_ptr(self.chain(address, links).offset(*last), sync_list);

        FakeWorld {
            game_object,
            address,
            actors_list,
            loot_list,
            grenades_list,
            sync_list,
        }
    }

    /// Unregisters the world object so discovery no longer finds it.
    pub fn unregister_world(&self, world: &FakeWorld) {
        let objects = &self.layout.objects;
        self.write_ptr(world.game_object.offset(objects.object_name_offset), self.cstring("Destroyed"));
    }

    /// Makes an existing world fail revalidation.
    pub fn break_world(&self, world: &FakeWorld) {
        self.write_ptr(world.address.offset(self.layout.world.main_actor_offset), RemoteAddress::NULL);
    }

    pub fn set_local(&self, world: &FakeWorld, actor: &FakeActor) {
        self.write_ptr(world.address.offset(self.layout.world.main_actor_offset), actor.address);
    }

    /// An actor with a full transform, rotation, equipment and profile.
    pub fn actor(&self, name: &str, ai: bool, position: Vec3) -> FakeActor {
        let layout = &self.layout.actor;
        let address = self.classed("Player");
        self.write(address.offset(layout.is_ai_offset), u8::from(ai));
        self.write_ptr(address.offset(layout.name_offset), self.string(name));
        self.write(address.offset(layout.side_offset), 1i32);

        let (transform, position_cell) = self.transform(position);
        let (last, links) = layout.transform_chain.split_last().expect("transform chain");
        self.write_ptr(self.chain(address, links).offset(*last), transform);

        let rotation_cell = self.chain(address, &layout.rotation_chain).offset(layout.rotation_offset);
        self.write(rotation_cell, Vec2::new(90.0, 0.0));

        let equipment_list = self.list(&[]);
        let (last, links) = layout.equipment_chain.split_last().expect("equipment chain");
        self.write_ptr(self.chain(address, links).offset(*last), equipment_list);

        let profile = self.alloc();
        self.write_ptr(address.offset(layout.profile_offset), profile);
        self.write_ptr(profile.offset(self.layout.quests.data_offset), self.list(&[]));

        let hands = self.classed(&layout.empty_hands_class);
        self.write_ptr(address.offset(layout.hands_controller_offset), hands);

        FakeActor {
            address,
            position_cell,
            rotation_cell,
            equipment_list,
            profile,
        }
    }

    /// Puts a weapon in `actor`'s hands, which ends the pre-raid phase.
    pub fn start_raid(&self, actor: &FakeActor) {
        let hands = self.classed("ClientFirearmController");
        self.write_ptr(actor.address.offset(self.layout.actor.hands_controller_offset), hands);
    }

    pub fn set_side(&self, actor: &FakeActor, side: i32) {
        self.write(actor.address.offset(self.layout.actor.side_offset), side);
    }

    pub fn kill(&self, actor: &FakeActor) {
        let corpse = self.alloc();
        self.write_ptr(actor.address.offset(self.layout.actor.corpse_offset), corpse);
    }

    /// An item object whose id resolves through `chain`.
    pub fn item(&self, id: &str, chain: &[u64]) -> RemoteAddress {
        let item = self.alloc();
        let (last, links) = chain.split_last().expect("item chain");
        self.write_ptr(self.chain(item, links).offset(*last), self.string(id));
        item
    }

    pub fn equip(&self, actor: &FakeActor, ids: &[&str]) {
        let items: Vec<RemoteAddress> = ids
            .iter()
            .map(|id| self.item(id, &self.layout.actor.item_id_chain))
            .collect();
        self.set_list(actor.equipment_list, &items);
    }

    pub fn grenade(&self, smoke: bool, position: Vec3) -> (RemoteAddress, RemoteAddress) {
        let layout = &self.layout.explosives;
        let class = if smoke { "SmokeGrenade" } else { "Grenade" };
        let grenade = self.classed(class);
        let (transform, cell) = self.transform(position);
        let (last, links) = layout.grenade_transform_chain.split_last().expect("grenade chain");
        self.write_ptr(self.chain(grenade, links).offset(*last), transform);
        (grenade, cell)
    }

    pub fn destroy_grenade(&self, grenade: RemoteAddress) {
        self.write(grenade.offset(self.layout.explosives.destroyed_offset), 1u8);
    }

    pub fn sync_object(&self, type_tag: i32, state: i32, position: Vec3) -> RemoteAddress {
        let layout = &self.layout.explosives;
        let object = self.alloc();
        self.write(object.offset(layout.sync_type_offset), type_tag);
        self.write(object.offset(layout.tripwire_state_offset), state);
        self.write(object.offset(layout.tripwire_position_offset), position);
        object
    }

    pub fn loot(&self, id: &str, position: Vec3) -> RemoteAddress {
        let layout = &self.layout.loot;
        let loot = self.item(id, &layout.item_id_chain);
        let (transform, _) = self.transform(position);
        let (last, links) = layout.transform_chain.split_last().expect("loot chain");
        self.write_ptr(self.chain(loot, links).offset(*last), transform);
        loot
    }

    /// Writes the local player's quest status list.
    pub fn quests(&self, actor: &FakeActor, entries: &[(&str, i32, &[&str])]) {
        let layout = &self.layout.quests;
        let mut statuses = Vec::new();
        for (id, status, completed) in entries {
            let entry = self.alloc();
            self.write_ptr(entry.offset(layout.id_offset), self.string(id));
            self.write(entry.offset(layout.status_offset), *status);
            let conditions: Vec<RemoteAddress> = completed.iter().map(|c| self.string(c)).collect();
            self.write_ptr(entry.offset(layout.completed_offset), self.list(&conditions));
            statuses.push(entry);
        }
        self.write_ptr(actor.profile.offset(layout.data_offset), self.list(&statuses));
    }

    /// A session context bound to `pid`, as an attach would build it.
    pub fn context(&self, pid: ProcessId, config: MirrorConfig, catalog: QuestCatalog) -> Arc<SessionContext> {
        self.context_with_store(pid, config, catalog, Arc::new(InMemoryRelationshipStore::new()))
    }

    pub fn context_with_store(
        &self,
        pid: ProcessId,
        config: MirrorConfig,
        catalog: QuestCatalog,
        store: Arc<dyn RelationshipStore>,
    ) -> Arc<SessionContext> {
        let channel: Arc<dyn AcquisitionChannel> = self.sim.clone();
        Arc::new(SessionContext::new(
            Session {
                pid,
                module_base: MODULE_BASE,
                object_manager: self.manager,
            },
            RemoteMemory::new(channel, pid),
            Arc::new(config),
            Arc::new(catalog),
            store,
        ))
    }
}

/// A running world with a local player, one human and one AI.
pub struct Scene {
    pub target: FakeTarget,
    pub world: FakeWorld,
    pub local: FakeActor,
    pub human: FakeActor,
    pub bot: FakeActor,
}

impl Scene {
    pub fn new(config: &MirrorConfig) -> Self {
        let target = FakeTarget::new();
        target.start_process(PID, config);
        let world = target.spawn_world(MAP);
        let local = target.actor("me", false, Vec3::new(1.0, 0.0, 1.0));
        let human = target.actor("Sniper", false, Vec3::new(40.0, 0.0, 40.0));
        let bot = target.actor("scav_01", true, Vec3::new(-30.0, 0.0, 5.0));
        target.set_local(&world, &local);
        target.set_list(world.actors_list, &[local.address, human.address, bot.address]);
        Self {
            target,
            world,
            local,
            human,
            bot,
        }
    }

    pub fn set_actors(&self, actors: &[&FakeActor]) {
        let addresses: Vec<RemoteAddress> = actors.iter().map(|a| a.address).collect();
        self.target.set_list(self.world.actors_list, &addresses);
    }
}

/// A mirror that was subscribed before the target process appeared and has
/// reached its first raid.
pub struct Running {
    pub config: MirrorConfig,
    pub scene: Scene,
    pub mirror: Mirror,
    pub events: Receiver<LifecycleEvent>,
    /// Everything published up to and including the first `RaidStarted`.
    pub startup: Vec<LifecycleEvent>,
}

impl Running {
    pub fn new(config: MirrorConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryRelationshipStore::new()))
    }

    pub fn with_store(config: MirrorConfig, store: Arc<dyn RelationshipStore>) -> Self {
        let scene = Scene::new(&config);
        scene.target.sim.kill_process(&config.process_name);

        let mirror = start_mirror(&scene.target, config.clone(), store);
        let events = mirror.subscribe();
        scene.target.start_process(PID, &config);
        let startup = collect_until(&events, TIMEOUT, |e| matches!(e, LifecycleEvent::RaidStarted { .. }))
            .expect("first raid starts");
        Self {
            config,
            scene,
            mirror,
            events,
            startup,
        }
    }
}
