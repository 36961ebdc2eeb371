//! In-process reconciliation tests: host simulation against client visuals.

use mirror_client::correction::{self, ProjectileCorrection};
use mirror_host::{
    host::DemoDirector,
    sim::{AttackSpawn, WorldSim},
};
use mirror_shared::{
    config::MirrorConfig,
    event::VisualEvent,
    kinematics,
    math::Vec2,
    render::RecordingRenderer,
    rows::{AttackKind, GemLevel, MonsterType, MonsterVariant, TableId, VisualKey},
};
use mirror_tests::LocalMirror;

fn mirror_of(sim: WorldSim) -> LocalMirror<RecordingRenderer> {
    LocalMirror::new(MirrorConfig::default(), RecordingRenderer::new(), sim)
}

fn mirror() -> LocalMirror<RecordingRenderer> {
    mirror_of(WorldSim::new(20))
}

#[test]
fn linear_prediction_stays_within_one_tick_of_host() {
    let mut m = mirror();
    let id = m
        .sim
        .spawn_attack(AttackSpawn::new(AttackKind::Sword, Vec2::new(100.0, 100.0), Vec2::new(1.0, 0.0)))
        .unwrap();
    let key = VisualKey::Projectile(id);
    m.sync();
    m.frame();
    assert!(m.visual(key).is_some());

    let reach = ProjectileCorrection::threshold(800.0, m.sim.tick_dt()).sqrt();
    for _ in 0..5 {
        m.sim.step();
        m.sync();
        for _ in 0..m.frames_per_tick() {
            m.frame();
            let d = m.divergence(key).unwrap();
            assert!(d <= reach + 1e-3, "drifted {d} past {reach}");
        }
    }

    let linear = m.visuals.drift()["linear"];
    assert_eq!(linear.snapped, 0);
    assert!(linear.kept >= 5);
}

/// Spawns `spawn`, then checks after every host tick that the correction
/// leaves the visual within one tick of travel and never snaps.
fn assert_tracks_host(m: &mut LocalMirror<RecordingRenderer>, spawn: AttackSpawn, ticks: u32, label: &str) {
    let id = m.sim.spawn_attack(spawn).unwrap();
    let key = VisualKey::Projectile(id);
    m.sync();
    m.visuals.pump(&m.cache);
    assert!(m.visual(key).is_some());

    let tick_dt = m.sim.tick_dt();
    for tick in 1..=ticks {
        for _ in 0..m.frames_per_tick() {
            m.frame();
        }
        m.sim.step();
        m.sync();
        m.visuals.pump(&m.cache);

        let handle = m.visual(key).unwrap();
        let archetype = handle.archetype().unwrap();
        assert_eq!(archetype.name(), label);
        let reach = correction::effective_speed(handle, archetype, tick_dt) * tick_dt;
        let d = m.divergence(key).unwrap();
        assert!(d <= reach + 1e-3, "{label} tick {tick}: drifted {d} past {reach}");
    }

    let stats = m.visuals.drift()[label];
    assert_eq!(stats.snapped, 0, "{label} snapped");
    assert_eq!(stats.kept, u64::from(ticks));
}

#[test]
fn gravity_arc_stays_within_one_tick_of_host() {
    let mut m = mirror();
    let spawn = AttackSpawn::new(AttackKind::Dumbbell, Vec2::ZERO, Vec2::new(0.6, -0.8));
    assert_tracks_host(&mut m, spawn, 18, "gravity");
}

#[test]
fn spiral_stays_within_one_tick_of_host() {
    let mut m = mirror();
    let spawn = AttackSpawn::new(AttackKind::ChaosBall, Vec2::new(50.0, 50.0), Vec2::new(1.0, 0.0)).phase(0.5);
    assert_tracks_host(&mut m, spawn, 40, "spiral");
}

#[test]
fn homing_bolt_stays_within_one_tick_of_host() {
    let mut m = mirror();
    let player = m.sim.spawn_player(Vec2::new(400.0, 400.0));
    let spawn = AttackSpawn::new(AttackKind::EnderBolt, Vec2::ZERO, Vec2::new(1.0, 0.0)).targeting(player);
    assert_tracks_host(&mut m, spawn, 40, "homing");
}

#[test]
fn shields_follow_a_moving_owner() {
    let mut m = mirror();
    let player = m.sim.spawn_player(Vec2::new(500.0, 500.0));
    let shields: Vec<VisualKey> = (0..3)
        .map(|i| {
            let id = m
                .sim
                .spawn_attack(
                    AttackSpawn::new(AttackKind::Shield, Vec2::ZERO, Vec2::new(1.0, 0.0))
                        .owned_by(player)
                        .in_burst(i)
                        .phase_degrees(45),
                )
                .unwrap();
            VisualKey::Projectile(id)
        })
        .collect();
    m.sync();
    m.frame();

    let orbit_radius = kinematics::distributed_orbit_radius(48.0, 32.0);
    let reach = 200.0_f32.to_radians() * orbit_radius * m.sim.tick_dt();
    for step in 1..=10 {
        m.sim.move_player(player, Vec2::new(500.0 + 5.0 * step as f32, 500.0));
        m.sim.step();
        m.sync();
        for _ in 0..m.frames_per_tick() {
            m.frame();
            for key in &shields {
                let d = m.divergence(*key).unwrap();
                assert!(d <= reach + 1e-2, "{key} drifted {d} past {reach}");
            }
        }
    }
    assert_eq!(m.visuals.drift()["orbit"].snapped, 0);
}

#[test]
fn dependent_row_waits_for_its_entity() {
    let mut sim = WorldSim::new(20);
    sim.dependent_first = true;
    let mut m = mirror_of(sim);

    let gem = m.sim.spawn_gem(Vec2::new(100.0, 200.0), GemLevel::Large);
    let key = VisualKey::Pickup(gem);
    let changes = m.sim.drain_changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].table(), TableId::Gems);

    m.cache.apply(changes[0].clone());
    m.visuals.pump(&m.cache);
    assert!(m.visuals.pending().contains_key(key));
    assert!(m.visual(key).is_none());

    m.cache.apply(changes[1].clone());
    m.visuals.pump(&m.cache);
    assert!(m.visuals.pending().is_empty());
    assert_eq!(m.visual(key).unwrap().predicted, Vec2::new(100.0, 200.0));
}

#[test]
fn demo_scene_mirrors_every_dependent_row() {
    let mut sim = WorldSim::new(20);
    sim.dependent_first = true;
    let mut m = mirror_of(sim);
    let mut demo = DemoDirector::new(11);
    demo.populate(&mut m.sim).unwrap();

    for _ in 0..100 {
        demo.tick(&mut m.sim).unwrap();
        m.sim.step();
        m.sync_one_by_one();
        for _ in 0..m.frames_per_tick() {
            m.frame();
        }
    }

    let world = m.sim.world();
    let expected = [TableId::Gems, TableId::Monsters, TableId::ActiveAttacks, TableId::AreaAttacks]
        .into_iter()
        .map(|t| world.len(t))
        .sum::<usize>();
    assert!(m.visuals.pending().is_empty());
    assert_eq!(m.visuals.registry().len(), expected);
}

#[test]
fn long_demo_run_keeps_event_queue_empty() {
    let mut m = mirror();
    let mut demo = DemoDirector::new(11);
    demo.populate(&mut m.sim).unwrap();

    for _ in 0..300 {
        demo.tick(&mut m.sim).unwrap();
        m.run_tick();
        assert_eq!(m.visuals.events_mut().len::<VisualEvent>(), 0);
    }
    let counts = m.events();
    assert!(counts.spawned > 0);
    assert!(counts.despawned > 0);
    assert!(counts.spawned >= counts.despawned);
}

#[test]
fn chasing_creature_walks_without_teleporting() {
    let mut m = mirror();
    m.sim.spawn_player(Vec2::ZERO);
    let rat = m.sim.spawn_monster(MonsterType::Rat, MonsterVariant::Default, Vec2::new(400.0, 0.0));
    let key = VisualKey::Creature(rat);
    m.sync();
    m.frame();

    for _ in 0..10 {
        m.run_tick();
    }
    assert_eq!(m.events().teleported, 0);
    assert!(m.events().spawned >= 1);

    let handle = m.visual(key).unwrap();
    assert!(handle.predicted.x < 400.0);
    assert!(m.divergence(key).unwrap() < 20.0);
}

#[test]
fn killed_monster_fades_and_drops_a_gem() {
    let mut m = mirror();
    let orc = m.sim.spawn_monster(MonsterType::Orc, MonsterVariant::Shiny, Vec2::new(50.0, 50.0));
    m.sync();
    m.frame();
    let body = m.visual(VisualKey::Creature(orc)).unwrap().resources.body;

    assert_eq!(m.sim.damage_monster(orc, 20), Some(30));
    m.sync();
    m.frame();
    assert_eq!(m.visual(VisualKey::Creature(orc)).unwrap().hp, 30);

    m.sim.damage_monster(orc, 100);
    m.sync();
    m.frame();
    assert!(m.visual(VisualKey::Creature(orc)).is_none());
    assert!(m.visuals.exits().contains(VisualKey::Creature(orc)));
    assert_eq!(m.visuals.registry().len(), 1);

    for _ in 0..14 {
        m.frame();
    }
    assert!(m.visuals.exits().is_empty());
    assert!(m.visuals.backend().was_destroyed(body));
}

#[test]
fn legacy_attack_resolves_by_numeric_id() {
    let mut m = mirror();
    let id = m
        .sim
        .spawn_attack(AttackSpawn::new(AttackKind::Wand, Vec2::ZERO, Vec2::new(0.0, 1.0)).legacy())
        .unwrap();
    m.sync();
    m.frame();
    let handle = m.visual(VisualKey::Projectile(id)).unwrap();
    assert_eq!(handle.kind.attack(), Some(AttackKind::Wand));
}

#[test]
fn late_joiner_catches_up_from_snapshot() {
    let mut sim = WorldSim::new(20);
    let player = sim.spawn_player(Vec2::new(300.0, 300.0));
    for i in 0..3 {
        sim.spawn_attack(
            AttackSpawn::new(AttackKind::Shield, Vec2::ZERO, Vec2::new(1.0, 0.0))
                .owned_by(player)
                .in_burst(i),
        )
        .unwrap();
    }
    sim.spawn_gem(Vec2::new(10.0, 10.0), GemLevel::Small);
    for _ in 0..4 {
        sim.step();
    }

    let mut m = mirror_of(sim);
    assert_eq!(m.visuals.registry().len(), 4);
    m.run_tick();
    assert_eq!(m.visuals.drift()["orbit"].snapped, 0);
}
