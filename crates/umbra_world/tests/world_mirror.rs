//! World mirror passes driven cycle by cycle, without worker threads.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{fast_config, FakeActor, Scene, MAP, PID};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umbra_core::{CancellationSource, CancellationToken, Vec3};
use umbra_memory::{RemoteAddress, ScatterBatch};
use umbra_world::entities::{ObjectiveKind, QuestCatalog, QuestDefinition, QuestObjective, QuestZone};
use umbra_world::{ActorKind, ActorState, CycleOutcome, MirrorConfig, MirrorError, TripwireState, WorldInstance};

struct Harness {
    scene: Scene,
    world: Arc<WorldInstance>,
    batch: ScatterBatch,
    token: CancellationToken,
}

impl Harness {
    fn new(config: MirrorConfig, catalog: QuestCatalog) -> Self {
        let scene = Scene::new(&config);
        let ctx = scene.target.context(PID, config, catalog);
        let world = WorldInstance::create(Arc::clone(&ctx), &CancellationToken::never()).unwrap();
        let batch = ScatterBatch::new(ctx.memory().clone()).with_cache(false);
        Self {
            scene,
            world,
            batch,
            token: CancellationToken::never(),
        }
    }

    fn slow(&mut self) -> CycleOutcome {
        self.world.slow_cycle(&mut self.batch, &self.token)
    }

    fn realtime(&mut self) -> CycleOutcome {
        self.world.realtime_cycle(&mut self.batch, &self.token)
    }

    fn explosives(&mut self) -> CycleOutcome {
        self.world.explosives_cycle(&mut self.batch, &self.token)
    }

    fn tracked(&self) -> HashSet<RemoteAddress> {
        self.world.roster().registry().addresses().into_iter().collect()
    }
}

fn addresses(actors: &[&FakeActor]) -> HashSet<RemoteAddress> {
    actors.iter().map(|a| a.address).collect()
}

#[test]
fn test_world_discovery_reads_map_and_local() {
    let h = Harness::new(fast_config(), QuestCatalog::default());
    assert_eq!(h.world.map_id(), MAP);
    assert_eq!(h.world.address(), h.scene.world.address);
    assert_eq!(h.world.roster().local_address(), h.scene.local.address);
    assert!(h.world.is_active());
}

#[test]
fn test_unknown_map_is_not_a_world() {
    let mut config = fast_config();
    config.known_maps = vec!["woods".to_owned()];
    let scene = Scene::new(&config);
    let ctx = scene.target.context(PID, config, QuestCatalog::default());

    let result = WorldInstance::create(ctx, &CancellationToken::never());
    assert!(matches!(result, Err(MirrorError::WorldNotFound(_))));
}

#[test]
fn test_empty_roster_is_not_a_world() {
    let config = fast_config();
    let scene = Scene::new(&config);
    scene.set_actors(&[]);
    let ctx = scene.target.context(PID, config, QuestCatalog::default());

    let result = WorldInstance::create(ctx, &CancellationToken::never());
    assert!(matches!(result, Err(MirrorError::WorldNotFound(_))));
}

#[test]
fn test_membership_hydrates_every_kind() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    assert_eq!(h.slow(), CycleOutcome::Continue);

    let s = &h.scene;
    assert_eq!(h.tracked(), addresses(&[&s.local, &s.human, &s.bot]));

    let roster = h.world.roster();
    let local = roster.local().unwrap();
    assert_eq!(local.kind(), ActorKind::Local);
    assert_eq!(local.name(), "me");
    assert_eq!(local.class_name(), "Player");

    let human = roster.registry().get(s.human.address).unwrap();
    assert_eq!(human.kind(), ActorKind::Human);
    assert_eq!(human.name(), "Sniper");
    assert_eq!(human.state(), ActorState::Active);

    let bot = roster.registry().get(s.bot.address).unwrap();
    assert_eq!(bot.kind(), ActorKind::Ai);
}

#[test]
fn test_realtime_uses_one_round_trip() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();

    let before = h.scene.target.sim.scatter_calls();
    assert_eq!(h.realtime(), CycleOutcome::Continue);
    assert_eq!(h.scene.target.sim.scatter_calls(), before + 1);

    let human = h.world.roster().registry().get(h.scene.human.address).unwrap();
    assert_eq!(human.position(), Vec3::new(40.0, 0.0, 40.0));
    assert_eq!(human.rotation().x, 90.0);

    h.scene.target.write(h.scene.human.position_cell, Vec3::new(41.0, 0.0, 40.0));
    h.realtime();
    assert_eq!(human.position(), Vec3::new(41.0, 0.0, 40.0));
}

#[test]
fn test_garbage_position_is_ignored() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();
    h.realtime();

    h.scene.target.write(h.scene.bot.position_cell, Vec3::new(f32::NAN, 0.0, 0.0));
    h.realtime();
    let bot = h.world.roster().registry().get(h.scene.bot.address).unwrap();
    assert_eq!(bot.position(), Vec3::new(-30.0, 0.0, 5.0));
}

#[test]
fn test_failed_read_only_fails_its_actor() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();

    h.scene.target.sim.fail_address(h.scene.bot.position_cell);
    h.scene.target.write(h.scene.human.position_cell, Vec3::new(7.0, 0.0, 7.0));
    assert_eq!(h.realtime(), CycleOutcome::Continue);

    let human = h.world.roster().registry().get(h.scene.human.address).unwrap();
    assert_eq!(human.position(), Vec3::new(7.0, 0.0, 7.0));
}

#[test]
fn test_departed_actors_die_or_vanish() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();
    let human = h.world.roster().registry().get(h.scene.human.address).unwrap();
    let bot = h.world.roster().registry().get(h.scene.bot.address).unwrap();

    h.scene.target.kill(&h.scene.human);
    h.scene.set_actors(&[&h.scene.local]);
    h.slow();

    assert_eq!(human.state(), ActorState::Dead);
    assert!(human.corpse().is_some());
    assert_eq!(bot.state(), ActorState::Unreachable);

    // The corpse is retained, the vanished bot is not.
    assert_eq!(h.tracked(), addresses(&[&h.scene.local, &h.scene.human]));

    // A dead actor is not revived by the realtime loop.
    h.realtime();
    assert_eq!(human.state(), ActorState::Dead);
}

#[test]
fn test_corpses_expire() {
    let mut config = fast_config();
    config.corpse_retention_ms = 0;
    let mut h = Harness::new(config, QuestCatalog::default());
    h.slow();

    h.scene.target.kill(&h.scene.human);
    h.scene.set_actors(&[&h.scene.local, &h.scene.bot]);
    h.slow();
    assert_eq!(h.tracked(), addresses(&[&h.scene.local, &h.scene.bot]));
}

#[test]
fn test_registry_follows_random_membership() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let extras: Vec<FakeActor> = (0..12)
        .map(|i| {
            h.scene
                .target
                .actor(&format!("extra_{i}"), i % 2 == 0, Vec3::new(i as f32 * 3.0 + 1.0, 0.0, 2.0))
        })
        .collect();

    let local = h.scene.local;
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..25 {
        let mut members = vec![&local];
        members.extend(extras.iter().filter(|_| rng.gen_bool(0.5)));
        h.scene.set_actors(&members);

        assert_eq!(h.slow(), CycleOutcome::Continue);
        assert_eq!(h.tracked(), addresses(&members));
    }
}

#[test]
fn test_world_end_after_retry_budget() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();

    h.scene.target.break_world(&h.scene.world);
    assert!(!h.world.is_active());
    assert_eq!(h.slow(), CycleOutcome::Fatal(MirrorError::WorldEnded));
    assert!(h.world.is_ended());
}

#[test]
fn test_torn_main_actor_is_not_trusted() {
    let h = Harness::new(fast_config(), QuestCatalog::default());
    let cell = h.scene.world.address.offset(h.scene.target.layout.world.main_actor_offset);
    h.scene.target.sim.make_volatile(cell, 1);
    assert!(!h.world.is_active());

    h.scene.target.sim.clear_faults();
    h.scene.target.set_local(&h.scene.world, &h.scene.local);
    assert!(h.world.is_active());
}

#[test]
fn test_cancelled_slow_cycle() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let source = CancellationSource::new();
    source.cancel();
    let outcome = h.world.slow_cycle(&mut h.batch, &source.token());
    assert_eq!(outcome, CycleOutcome::Fatal(MirrorError::Cancelled));
}

#[test]
fn test_cancelled_passes_leave_registries_alone() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let ledx = target.loot("ledx", Vec3::new(10.0, 0.0, 10.0));
    target.set_list(h.scene.world.loot_list, &[ledx]);
    h.slow();

    let fresh: Vec<RemoteAddress> = (0..16)
        .map(|i| h.scene.target.loot(&format!("item_{i}"), Vec3::new(i as f32 + 1.0, 0.0, 3.0)))
        .collect();
    h.scene.target.set_list(h.scene.world.loot_list, &fresh);
    h.scene
        .target
        .quests(&h.scene.local, &[("q_delivery", 2, &[])]);

    let source = CancellationSource::new();
    source.cancel();
    let token = source.token();
    let reads = h.scene.target.sim.read_calls();

    // Nothing is hydrated and the departed item is not swept.
    let loot = h.world.loot().refresh(&token);
    assert!(matches!(loot, Err(MirrorError::Cancelled)));
    assert_eq!(h.world.loot().items().addresses(), vec![ledx]);

    let equipment = h.world.roster().refresh_equipment(&token);
    assert!(matches!(equipment, Err(MirrorError::Cancelled)));
    let quests = h.world.quests().refresh(h.scene.local.address, &token);
    assert!(matches!(quests, Err(MirrorError::Cancelled)));
    assert!(h.world.quests().started().is_empty());

    // Only the list reads went out, no per-item hydration.
    assert!(h.scene.target.sim.read_calls() - reads < fresh.len() as u64);
}

#[test]
fn test_cancel_during_loot_stops_the_pass() {
    let h = Harness::new(fast_config(), QuestCatalog::default());
    let items: Vec<RemoteAddress> = (0..64)
        .map(|i| h.scene.target.loot(&format!("item_{i}"), Vec3::new(i as f32 + 1.0, 0.0, 3.0)))
        .collect();
    h.scene.target.set_list(h.scene.world.loot_list, &items);

    let source = CancellationSource::new();
    let token = source.token();
    let sim = Arc::clone(&h.scene.target.sim);
    let start = sim.read_calls();
    let canceller = std::thread::spawn(move || {
        while sim.read_calls() < start + 20 {
            std::thread::yield_now();
        }
        source.cancel();
    });

    let outcome = h.world.loot().refresh(&token);
    canceller.join().unwrap();
    if outcome.is_ok() {
        // The whole pass beat the canceller; nothing to assert about timing.
        assert_eq!(h.world.loot().items().len(), items.len());
        return;
    }
    assert!(matches!(outcome, Err(MirrorError::Cancelled)));
    assert!(h.world.loot().items().len() < items.len());
}

#[test]
fn test_raid_start_is_detected_from_the_hands() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    assert!(!h.world.is_raid_started());
    assert!(!h.world.roster().read_raid_started().unwrap());

    h.scene.target.start_raid(&h.scene.local);
    assert_eq!(h.slow(), CycleOutcome::Continue);
    assert!(h.world.is_raid_started());

    // A world found mid-raid starts out started.
    let ctx = Arc::clone(h.world.context());
    let again = WorldInstance::create(ctx, &CancellationToken::never()).unwrap();
    assert!(again.is_raid_started());
}

#[test]
fn test_unknown_hands_class_is_an_error() {
    let h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let odd = target.classed("Backpack");
    target.write_ptr(h.scene.local.address.offset(target.layout.actor.hands_controller_offset), odd);
    assert!(h.world.roster().read_raid_started().is_err());
}

#[test]
fn test_transform_revalidation_follows_moved_cell() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.slow();
    h.realtime();

    // The engine re-parents the transform: same transform, new vertex array.
    let target = &h.scene.target;
    let layout = target.layout.transform;
    let actor = h.world.roster().registry().get(h.scene.human.address).unwrap();
    let hierarchy = RemoteAddress::new(
        target
            .sim
            .peek::<u64>(actor.transform().offset(layout.hierarchy_offset))
            .unwrap(),
    );
    let vertices = target.alloc();
    target.write_ptr(hierarchy.offset(layout.vertices_offset), vertices);
    target.write(vertices.offset(2 * layout.vertex_stride), Vec3::new(12.0, 1.0, 12.0));

    assert_eq!(h.world.roster().validate_transforms().unwrap(), 1);
    h.realtime();
    assert_eq!(actor.position(), Vec3::new(12.0, 1.0, 12.0));
}

#[test]
fn test_equipment_of_humans() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    h.scene.target.equip(&h.scene.human, &["rifle", "helmet"]);
    h.scene.target.equip(&h.scene.bot, &["pistol"]);
    h.slow();

    let human = h.world.roster().registry().get(h.scene.human.address).unwrap();
    assert_eq!(human.equipment(), vec!["rifle".to_owned(), "helmet".to_owned()]);
    let bot = h.world.roster().registry().get(h.scene.bot.address).unwrap();
    assert!(bot.equipment().is_empty());
}

#[test]
fn test_grenades_tracked_until_destroyed() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let (frag, frag_cell) = target.grenade(false, Vec3::new(5.0, 1.0, 5.0));
    let (smoke, _) = target.grenade(true, Vec3::new(6.0, 1.0, 6.0));
    target.set_list(h.scene.world.grenades_list, &[frag, smoke]);

    assert_eq!(h.explosives(), CycleOutcome::Continue);
    let grenades = h.world.explosives().grenades();
    assert_eq!(grenades.len(), 2);
    assert!(grenades.get(smoke).unwrap().is_smoke());
    assert_eq!(grenades.get(frag).unwrap().position(), Vec3::new(5.0, 1.0, 5.0));

    h.scene.target.write(frag_cell, Vec3::new(8.0, 1.0, 5.0));
    h.explosives();
    assert_eq!(
        h.world.explosives().grenades().get(frag).unwrap().position(),
        Vec3::new(8.0, 1.0, 5.0)
    );

    h.scene.target.destroy_grenade(frag);
    h.explosives();
    assert!(h.world.explosives().grenades().get(frag).is_none());
    assert!(h.world.explosives().grenades().get(smoke).is_some());
}

#[test]
fn test_destroyed_grenade_is_not_rehydrated_while_listed() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let (frag, _) = target.grenade(false, Vec3::new(5.0, 1.0, 5.0));
    target.set_list(h.scene.world.grenades_list, &[frag]);
    h.explosives();
    h.scene.target.destroy_grenade(frag);
    h.explosives();
    assert!(h.world.explosives().grenades().is_empty());

    // Still listed: no re-hydration, no churn.
    for _ in 0..3 {
        let report = h
            .world
            .explosives()
            .refresh_grenades(&mut h.batch, &h.token)
            .unwrap();
        assert_eq!(report.added, 0);
        assert!(h.world.explosives().grenades().get(frag).is_none());
    }

    // Delisted, then the address is reused by a live grenade.
    let target = &h.scene.target;
    target.set_list(h.scene.world.grenades_list, &[]);
    h.explosives();
    let target = &h.scene.target;
    target.write(frag.offset(target.layout.explosives.destroyed_offset), 0u8);
    target.set_list(h.scene.world.grenades_list, &[frag]);
    h.explosives();
    assert!(h.world.explosives().grenades().get(frag).is_some());
}

#[test]
fn test_tripwires_filtered_and_tracked() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let tag = target.layout.explosives.tripwire_type;
    let wire = target.sync_object(tag, 1, Vec3::new(3.0, 0.5, 3.0));
    let other = target.sync_object(tag + 1, 1, Vec3::new(4.0, 0.5, 4.0));
    let garbage = target.sync_object(tag, 1, Vec3::new(0.0, 0.0, 0.0));
    target.set_list(h.scene.world.sync_list, &[wire, other, garbage]);

    h.explosives();
    let tripwires = h.world.explosives().tripwires();
    assert_eq!(tripwires.addresses(), vec![wire]);
    let tracked = tripwires.get(wire).unwrap();
    assert_eq!(tracked.state(), Some(TripwireState::Wait));
    assert!(tracked.is_armed());
    assert_eq!(tracked.position(), Vec3::new(3.0, 0.5, 3.0));

    let state_cell = wire.offset(h.scene.target.layout.explosives.tripwire_state_offset);
    h.scene.target.write(state_cell, 4i32);
    h.explosives();
    assert!(tracked.is_spent());

    // Spent wires are no longer read.
    h.scene.target.write(state_cell, 2i32);
    h.explosives();
    assert_eq!(tracked.state(), Some(TripwireState::Exploded));
}

#[test]
fn test_tripwire_survives_a_failed_tag_read() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let tag = target.layout.explosives.tripwire_type;
    let wire = target.sync_object(tag, 2, Vec3::new(3.0, 0.5, 3.0));
    let newcomer = target.sync_object(tag, 2, Vec3::new(6.0, 0.5, 6.0));
    target.set_list(h.scene.world.sync_list, &[wire]);
    h.explosives();
    let tracked = h.world.explosives().tripwires().get(wire).unwrap();

    let type_offset = h.scene.target.layout.explosives.sync_type_offset;
    h.scene.target.set_list(h.scene.world.sync_list, &[wire, newcomer]);
    h.scene.target.sim.fail_address(wire.offset(type_offset));
    h.scene.target.sim.fail_address(newcomer.offset(type_offset));
    assert_eq!(h.explosives(), CycleOutcome::Continue);

    // The known wire keeps its entry; an unconfirmed newcomer is not added.
    let tripwires = h.world.explosives().tripwires();
    assert!(Arc::ptr_eq(&tripwires.get(wire).unwrap(), &tracked));
    assert!(!tripwires.contains(newcomer));

    h.scene.target.sim.clear_faults();
    h.explosives();
    assert_eq!(h.world.explosives().tripwires().len(), 2);
}

#[test]
fn test_loot_reconciled_by_slow_loop() {
    let mut h = Harness::new(fast_config(), QuestCatalog::default());
    let target = &h.scene.target;
    let ledx = target.loot("ledx", Vec3::new(10.0, 0.0, 10.0));
    let gpu = target.loot("gpu", Vec3::new(11.0, 0.0, 10.0));
    target.set_list(h.scene.world.loot_list, &[ledx, gpu]);

    h.slow();
    let items = h.world.loot().items();
    assert_eq!(items.len(), 2);
    assert_eq!(items.get(ledx).unwrap().item_id(), "ledx");
    assert_eq!(items.get(gpu).unwrap().position(), Vec3::new(11.0, 0.0, 10.0));

    h.scene.target.set_list(h.scene.world.loot_list, &[gpu]);
    h.slow();
    assert_eq!(h.world.loot().items().addresses(), vec![gpu]);
}

fn catalog() -> QuestCatalog {
    let zone = |id: &str, map: &str| QuestZone {
        id: id.to_owned(),
        map_id: map.to_owned(),
        position: Vec3::new(1.0, 2.0, 3.0),
    };
    QuestCatalog::new([
        QuestDefinition {
            id: "q_delivery".to_owned(),
            name: "Delivery".to_owned(),
            objectives: vec![
                QuestObjective {
                    id: "find_docs".to_owned(),
                    kind: ObjectiveKind::FindQuestItem,
                    item_id: Some("docs".to_owned()),
                    zones: Vec::new(),
                },
                QuestObjective {
                    id: "visit_office".to_owned(),
                    kind: ObjectiveKind::Visit,
                    item_id: None,
                    zones: vec![zone("office", MAP), zone("dock", "shoreline")],
                },
            ],
        },
        QuestDefinition {
            id: "q_done".to_owned(),
            name: "Done".to_owned(),
            objectives: vec![QuestObjective {
                id: "find_key".to_owned(),
                kind: ObjectiveKind::FindItem,
                item_id: Some("key".to_owned()),
                zones: Vec::new(),
            }],
        },
    ])
}

#[test]
fn test_quests_from_local_profile() {
    let mut h = Harness::new(fast_config(), catalog());
    h.scene
        .target
        .quests(&h.scene.local, &[("q_delivery", 2, &[]), ("q_done", 4, &[]), ("q_unknown", 2, &[])]);

    h.slow();
    let quests = h.world.quests();
    assert_eq!(quests.started(), HashSet::from(["q_delivery".to_owned()]));
    assert_eq!(quests.items(), HashSet::from(["docs".to_owned()]));
    let locations = quests.locations();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].key, "q_delivery:visit_office:office");

    // Completing the item objective sweeps it.
    h.scene
        .target
        .quests(&h.scene.local, &[("q_delivery", 2, &["find_docs"])]);
    h.slow();
    assert!(h.world.quests().items().is_empty());
    assert_eq!(h.world.quests().locations().len(), 1);
}

#[test]
fn test_failed_quest_read_is_retried_at_once() {
    let mut config = fast_config();
    config.cadence.quest_refresh_ms = 60_000;
    let h = Harness::new(config, catalog());
    let target = &h.scene.target;
    target.quests(&h.scene.local, &[("q_delivery", 2, &[])]);
    let data = h.scene.local.profile.offset(target.layout.quests.data_offset);

    let quests = h.world.quests();
    let local = h.scene.local.address;
    target.sim.fail_address(data);
    assert!(quests.refresh(local, &h.token).is_err());

    target.sim.clear_faults();
    assert!(quests.refresh(local, &h.token).unwrap());
    assert_eq!(quests.started(), HashSet::from(["q_delivery".to_owned()]));

    // A successful read does start the interval.
    assert!(!quests.refresh(local, &h.token).unwrap());
}
