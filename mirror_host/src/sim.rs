//! Authoritative world simulation.
//!
//! Owns the replicated tables and advances them one fixed tick at a time.
//! Attacks move with the same step functions the client predicts with, so a
//! client that extrapolates between ticks lands close to the next row.
//!
//! Determinism notes:
//! - Ticks are fixed; nothing here reads the wall clock.
//! - Collections are iterated in key order.
//! - Each tick emits an attack's own row before its entity row.

use std::collections::BTreeMap;

use anyhow::Context;
use mirror_shared::{
    kinematics::{self, Archetype, GrowthFade, OrbitLayout},
    math::Vec2,
    rows::{
        AreaAttackRow, AttackDefinition, AttackKind, ConfigRow, CreatureRow, DependentRow, EntityId,
        EntityRow, GemLevel, MonsterType, MonsterVariant, PickupRow, ProjectileRow, Row, TableId,
    },
    store::{ReplicaCache, ReplicaSource, RowChange},
};
use tracing::debug;

/// Radius of every player entity.
pub const PLAYER_RADIUS: f32 = 48.0;

/// Monsters stop this far outside the player's edge.
const MONSTER_STANDOFF: f32 = 4.0;

/// `AttackData` rows seeded into every world.
pub fn attack_definitions() -> Vec<AttackDefinition> {
    use AttackKind::*;
    let def = |kind, speed, radius, duration_ms| AttackDefinition {
        kind,
        speed,
        radius,
        duration_ms,
    };
    vec![
        def(Sword, 800.0, 32.0, 340),
        def(Wand, 800.0, 20.0, 390),
        def(Knives, 1000.0, 15.0, 490),
        def(Shield, 200.0, 32.0, 4250),
        def(ThunderHorn, 0.0, 48.0, 200),
        def(AngelStaff, 0.0, 196.0, 100),
        def(Football, 600.0, 24.0, 2500),
        def(Cards, 700.0, 16.0, 800),
        def(Dumbbell, 800.0, 40.0, 1000),
        def(Garlic, 0.0, 100.0, 100),
        def(Volleyball, 700.0, 35.0, 800),
        def(Joint, 600.0, 16.0, 600),
        def(ImpBolt, 600.0, 16.0, 2000),
        def(EnderBolt, 800.0, 27.0, 4000),
        def(EnderScytheSpawn, 0.0, 62.0, 1500),
        def(EnderScythe, 24.0, 62.0, 8000),
        def(ChaosBall, 600.0, 32.0, 8000),
        def(VoidZone, 0.0, 199.0, 60000),
        def(AgnaFlamethrowerJet, 500.0, 16.0, 3000),
        def(AgnaOrbSpawn, 0.0, 24.0, 50),
        def(AgnaFireOrb, 300.0, 24.0, 2500),
        def(AgnaCandleBolt, 400.0, 24.0, 3000),
        def(AgnaPhase2FlameJet, 550.0, 16.0, 3000),
        def(AgnaGroundFlame, 0.0, 80.0, 120000),
    ]
}

/// Bestiary entry for a monster type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonsterStats {
    pub max_hp: u32,
    pub speed: f32,
    pub radius: f32,
}

pub fn bestiary(kind: MonsterType) -> MonsterStats {
    let (max_hp, speed, radius) = match kind {
        MonsterType::Rat => (10, 80.0, 24.0),
        MonsterType::Slime => (25, 50.0, 30.0),
        MonsterType::Orc => (50, 70.0, 40.0),
        MonsterType::FinalBossPhase1 => (500, 100.0, 92.0),
        MonsterType::FinalBossPhase2 => (500, 130.0, 128.0),
        MonsterType::VoidChest => (200, 0.0, 82.0),
        MonsterType::Imp => (18, 50.0, 34.0),
        MonsterType::Zombie => (100, 54.0, 42.0),
        MonsterType::EnderClaw => (40, 120.0, 32.0),
        MonsterType::Bat => (8, 110.0, 20.0),
    };
    MonsterStats {
        max_hp,
        speed,
        radius,
    }
}

/// Parameters of a new moving attack.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackSpawn {
    pub kind: AttackKind,
    pub position: Vec2,
    pub direction: Vec2,
    pub owner: Option<EntityId>,
    pub target: Option<EntityId>,
    pub id_within_burst: u32,
    /// Orbit phase in degrees.
    pub parameter_u: u32,
    /// Phase in radians for spirals.
    pub parameter_f: f32,
    /// Leave the type tag empty and rely on the legacy id.
    pub legacy_only: bool,
}

impl AttackSpawn {
    pub fn new(kind: AttackKind, position: Vec2, direction: Vec2) -> Self {
        Self {
            kind,
            position,
            direction,
            owner: None,
            target: None,
            id_within_burst: 0,
            parameter_u: 0,
            parameter_f: 0.0,
            legacy_only: false,
        }
    }

    pub fn owned_by(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn targeting(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn in_burst(mut self, index: u32) -> Self {
        self.id_within_burst = index;
        self
    }

    pub fn phase_degrees(mut self, degrees: u32) -> Self {
        self.parameter_u = degrees;
        self
    }

    pub fn phase(mut self, radians: f32) -> Self {
        self.parameter_f = radians;
        self
    }

    pub fn legacy(mut self) -> Self {
        self.legacy_only = true;
        self
    }
}

/// Host-side kinematic state of one live attack.
#[derive(Debug, Clone)]
struct LiveAttack {
    attack_id: u32,
    entity: EntityId,
    kind: AttackKind,
    area: bool,
    archetype: Archetype,
    position: Vec2,
    direction: Vec2,
    velocity: Vec2,
    speed: f32,
    base_radius: f32,
    radius: f32,
    lifetime_ms: f32,
    ticks: u32,
    owner: Option<EntityId>,
    target: Option<EntityId>,
    id_within_burst: u32,
    parameter_u: u32,
    parameter_f: f32,
    orbit_radius: f32,
    spiral_base: Vec2,
    legacy_only: bool,
}

impl LiveAttack {
    fn row(&self) -> Row {
        let attack_type = (!self.legacy_only).then(|| self.kind.tag().to_string());
        if self.area {
            Row::AreaAttack(AreaAttackRow {
                attack_id: self.attack_id,
                entity_id: self.entity,
                owner_entity_id: self.owner,
                attack_type,
                legacy_type_id: self.kind.legacy_id(),
                radius: self.radius,
                ticks_elapsed: self.ticks,
            })
        } else {
            Row::Projectile(ProjectileRow {
                attack_id: self.attack_id,
                entity_id: self.entity,
                owner_entity_id: self.owner,
                target_entity_id: self.target,
                attack_type,
                legacy_type_id: self.kind.legacy_id(),
                id_within_burst: self.id_within_burst,
                parameter_u: self.parameter_u,
                parameter_f: self.parameter_f,
                ticks_elapsed: self.ticks,
                radius: self.radius,
            })
        }
    }

    fn entity_row(&self) -> EntityRow {
        EntityRow {
            entity_id: self.entity,
            position: self.position,
            direction: self.direction,
            is_moving: self.archetype.is_moving(),
            radius: self.radius,
        }
    }

    fn table(&self) -> TableId {
        if self.area {
            TableId::AreaAttacks
        } else {
            TableId::ActiveAttacks
        }
    }
}

/// Fixed-tick authoritative world.
pub struct WorldSim {
    world: ReplicaCache,
    changes: Vec<RowChange>,
    tick: u64,
    tick_dt: f32,
    next_entity: u32,
    next_gem: u32,
    next_monster: u32,
    next_attack: u32,
    players: Vec<EntityId>,
    attacks: BTreeMap<u32, LiveAttack>,
    /// Emit a dependent row before its entity row on spawn.
    pub dependent_first: bool,
}

impl WorldSim {
    /// Creates a world seeded with `Config` and every `AttackData` row.
    pub fn new(tick_hz: u32) -> Self {
        let tick_rate_ms = 1000 / tick_hz.clamp(1, 1000);
        let mut world = ReplicaCache::new();
        world.load_rows(std::iter::once(Row::Config(ConfigRow {
            tick_rate_ms,
            ..ConfigRow::default()
        })));
        world.load_rows(attack_definitions().into_iter().map(Row::AttackData));

        Self {
            world,
            changes: Vec::new(),
            tick: 0,
            tick_dt: tick_rate_ms as f32 / 1000.0,
            next_entity: 1,
            next_gem: 1,
            next_monster: 1,
            next_attack: 1,
            players: Vec::new(),
            attacks: BTreeMap::new(),
            dependent_first: false,
        }
    }

    pub fn world(&self) -> &ReplicaCache {
        &self.world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_dt(&self) -> f32 {
        self.tick_dt
    }

    pub fn players(&self) -> &[EntityId] {
        &self.players
    }

    pub fn attack_count(&self) -> usize {
        self.attacks.len()
    }

    pub fn monster_count(&self) -> usize {
        self.world.len(TableId::Monsters)
    }

    pub fn monster_entity(&self, monster_id: u32) -> Option<EntityId> {
        match self.world.find_by_index(TableId::Monsters, monster_id) {
            Some(Row::Creature(row)) => Some(row.entity_id),
            _ => None,
        }
    }

    pub fn entity_position(&self, entity: EntityId) -> Option<Vec2> {
        self.world.find_entity(entity).map(|e| e.position)
    }

    /// Entity bound to a live attack.
    pub fn attack_entity(&self, attack_id: u32) -> Option<EntityId> {
        self.attacks.get(&attack_id).map(|a| a.entity)
    }

    /// Takes every change emitted since the last drain, in order.
    pub fn drain_changes(&mut self) -> Vec<RowChange> {
        std::mem::take(&mut self.changes)
    }

    // ─── Spawning ───

    pub fn spawn_player(&mut self, position: Vec2) -> EntityId {
        let entity = self.alloc_entity();
        self.upsert(Row::Entity(EntityRow {
            radius: PLAYER_RADIUS,
            ..EntityRow::at(entity, position)
        }));
        self.players.push(entity);
        debug!(entity = %entity, "player spawned");
        entity
    }

    pub fn move_player(&mut self, entity: EntityId, to: Vec2) {
        if let Some(row) = self.world.find_entity(entity) {
            let heading = (to - row.position).normalize();
            self.upsert(Row::Entity(EntityRow {
                position: to,
                direction: if heading == Vec2::ZERO { row.direction } else { heading },
                is_moving: heading != Vec2::ZERO,
                ..row
            }));
        }
    }

    pub fn spawn_gem(&mut self, position: Vec2, level: GemLevel) -> u32 {
        let gem_id = self.next_gem;
        self.next_gem += 1;
        let entity = self.alloc_entity();
        let row = DependentRow::Pickup(PickupRow {
            gem_id,
            entity_id: entity,
            level,
            value: 1,
        });
        self.insert_pair(EntityRow::at(entity, position), row);
        gem_id
    }

    pub fn collect_gem(&mut self, gem_id: u32) -> bool {
        match self.world.find_by_index(TableId::Gems, gem_id) {
            Some(Row::Pickup(gem)) => {
                self.remove(TableId::Gems, gem_id);
                self.remove(TableId::Entity, gem.entity_id.0);
                true
            }
            _ => false,
        }
    }

    pub fn spawn_monster(&mut self, bestiary_id: MonsterType, variant: MonsterVariant, position: Vec2) -> u32 {
        let stats = bestiary(bestiary_id);
        let monster_id = self.next_monster;
        self.next_monster += 1;
        let entity = self.alloc_entity();
        let row = DependentRow::Creature(CreatureRow {
            monster_id,
            entity_id: entity,
            bestiary: bestiary_id,
            variant,
            hp: stats.max_hp,
            max_hp: stats.max_hp,
            radius: stats.radius,
            speed: stats.speed,
        });
        self.insert_pair(
            EntityRow {
                radius: stats.radius,
                ..EntityRow::at(entity, position)
            },
            row,
        );
        monster_id
    }

    /// Applies damage; a monster at zero hp dies and drops a gem.
    /// Returns the remaining hp, or `None` for an unknown monster.
    pub fn damage_monster(&mut self, monster_id: u32, amount: u32) -> Option<u32> {
        let Some(Row::Creature(creature)) = self.world.find_by_index(TableId::Monsters, monster_id) else {
            return None;
        };
        let hp = creature.hp.saturating_sub(amount);
        if hp > 0 {
            self.upsert(Row::Creature(CreatureRow { hp, ..creature }));
            return Some(hp);
        }

        let at = self.world.find_entity(creature.entity_id).map(|e| e.position);
        self.remove(TableId::Monsters, monster_id);
        self.remove(TableId::Entity, creature.entity_id.0);
        if let Some(at) = at {
            self.spawn_gem(at, GemLevel::Small);
        }
        debug!(monster_id, "monster killed");
        Some(0)
    }

    /// Spawns a moving attack into `ActiveAttacks`.
    pub fn spawn_attack(&mut self, spawn: AttackSpawn) -> anyhow::Result<u32> {
        let def = self
            .world
            .find_attack_definition(spawn.kind)
            .with_context(|| format!("no AttackData for {}", spawn.kind))?;
        let archetype = Archetype::for_projectile(spawn.kind);
        let direction = spawn.direction.normalize();
        let mut attack = self.new_attack(def, archetype, false);
        attack.position = spawn.position;
        attack.direction = direction;
        attack.velocity = direction * def.speed;
        attack.owner = spawn.owner;
        attack.target = spawn.target;
        attack.id_within_burst = spawn.id_within_burst;
        attack.parameter_u = spawn.parameter_u;
        attack.parameter_f = spawn.parameter_f;
        attack.spiral_base = spawn.position;
        attack.legacy_only = spawn.legacy_only;

        if let Archetype::Orbit(layout) = archetype {
            if let Some(owner) = attack.owner.and_then(|id| self.world.find_entity(id)) {
                if layout == OrbitLayout::Captured {
                    let offset = spawn.position - owner.position;
                    attack.orbit_radius = offset.length();
                    attack.parameter_f = offset.angle();
                }
                self.advance_attack(&mut attack, 0.0);
            }
        }

        let id = attack.attack_id;
        let entity = attack.entity_row();
        let row = attack.row();
        self.attacks.insert(id, attack);
        self.insert_pair_row(entity, row);
        Ok(id)
    }

    /// Spawns a zone into `AreaAttacks`.
    pub fn spawn_area(
        &mut self,
        kind: AttackKind,
        position: Vec2,
        radius: f32,
        owner: Option<EntityId>,
    ) -> anyhow::Result<u32> {
        let def = self
            .world
            .find_attack_definition(kind)
            .with_context(|| format!("no AttackData for {kind}"))?;
        let mut attack = self.new_attack(def, Archetype::Stationary, true);
        attack.position = position;
        attack.radius = radius;
        attack.base_radius = radius;
        attack.owner = owner;

        let id = attack.attack_id;
        let entity = attack.entity_row();
        let row = attack.row();
        self.attacks.insert(id, attack);
        self.insert_pair_row(entity, row);
        Ok(id)
    }

    fn new_attack(&mut self, def: AttackDefinition, archetype: Archetype, area: bool) -> LiveAttack {
        let attack_id = self.next_attack;
        self.next_attack += 1;
        LiveAttack {
            attack_id,
            entity: self.alloc_entity(),
            kind: def.kind,
            area,
            archetype,
            position: Vec2::ZERO,
            direction: Vec2::new(1.0, 0.0),
            velocity: Vec2::ZERO,
            speed: def.speed,
            base_radius: def.radius,
            radius: def.radius,
            lifetime_ms: def.duration_ms as f32,
            ticks: 0,
            owner: None,
            target: None,
            id_within_burst: 0,
            parameter_u: 0,
            parameter_f: 0.0,
            orbit_radius: 0.0,
            spiral_base: Vec2::ZERO,
            legacy_only: false,
        }
    }

    // ─── Stepping ───

    /// Advances one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        let dt = self.tick_dt;
        self.step_monsters(dt);
        self.step_attacks(dt);
    }

    fn step_monsters(&mut self, dt: f32) {
        let players: Vec<EntityRow> = self
            .players
            .iter()
            .filter_map(|id| self.world.find_entity(*id))
            .collect();

        for row in self.world.snapshot(TableId::Monsters) {
            let Row::Creature(creature) = row else {
                continue;
            };
            let Some(entity) = self.world.find_entity(creature.entity_id) else {
                continue;
            };
            let nearest = players
                .iter()
                .min_by(|a, b| {
                    a.position
                        .distance_sq(entity.position)
                        .total_cmp(&b.position.distance_sq(entity.position))
                });

            let reach = creature.radius + PLAYER_RADIUS + MONSTER_STANDOFF;
            let chase = nearest
                .filter(|p| creature.speed > 0.0 && p.position.distance_sq(entity.position) > reach * reach);
            match chase {
                Some(player) => {
                    let heading = (player.position - entity.position).normalize();
                    let position = kinematics::step_linear(entity.position, heading, creature.speed, dt);
                    self.upsert(Row::Entity(EntityRow {
                        position,
                        direction: heading,
                        is_moving: true,
                        ..entity
                    }));
                }
                None if entity.is_moving => {
                    self.upsert(Row::Entity(EntityRow {
                        is_moving: false,
                        ..entity
                    }));
                }
                None => {}
            }
        }
    }

    fn step_attacks(&mut self, dt: f32) {
        let ids: Vec<u32> = self.attacks.keys().copied().collect();
        for id in ids {
            let Some(mut attack) = self.attacks.remove(&id) else {
                continue;
            };
            attack.ticks += 1;
            let elapsed_ms = attack.ticks as f32 * dt * 1000.0;
            if elapsed_ms >= attack.lifetime_ms {
                self.remove(attack.table(), attack.attack_id);
                self.remove(TableId::Entity, attack.entity.0);
                debug!(attack_id = attack.attack_id, kind = %attack.kind, ticks = attack.ticks, "attack expired");
                continue;
            }

            self.advance_attack(&mut attack, dt);
            self.upsert(attack.row());
            if attack.archetype.is_moving() {
                self.upsert(Row::Entity(attack.entity_row()));
            }
            self.attacks.insert(id, attack);
        }
    }

    /// Moves `attack` to its position after its current tick count.
    fn advance_attack(&self, attack: &mut LiveAttack, dt: f32) {
        match attack.archetype {
            Archetype::Linear => {
                attack.position = kinematics::step_linear(attack.position, attack.direction, attack.speed, dt);
            }
            Archetype::Gravity => {
                let gravity = kinematics::gravity_for(attack.speed);
                let (position, velocity) = kinematics::step_gravity(attack.position, attack.velocity, gravity, dt);
                attack.position = position;
                attack.velocity = velocity;
                if attack.speed > 0.0 {
                    attack.direction = velocity * (1.0 / attack.speed);
                }
            }
            Archetype::Orbit(layout) => {
                let Some(owner) = attack.owner.and_then(|id| self.world.find_entity(id)) else {
                    return;
                };
                let rate = kinematics::orbit_rate_per_tick(attack.speed, self.tick_dt);
                let ticks = attack.ticks as f32;
                let angle = match layout {
                    OrbitLayout::Distributed => {
                        let (index, total) = self.orbit_slot(attack);
                        attack.orbit_radius = kinematics::distributed_orbit_radius(owner.radius, attack.base_radius);
                        kinematics::orbit_angle(attack.parameter_u as f32, index, total, rate, ticks)
                    }
                    OrbitLayout::Captured => kinematics::captured_orbit_angle(attack.parameter_f, rate, ticks),
                };
                attack.position = kinematics::orbit_position(owner.position, attack.orbit_radius, angle);
                attack.direction = Vec2::new(-angle.sin(), angle.cos());
            }
            Archetype::Spiral => {
                attack.spiral_base = kinematics::step_linear(attack.spiral_base, attack.direction, attack.speed, dt);
                let elapsed = attack.ticks as f32 * self.tick_dt;
                attack.position = attack.spiral_base + kinematics::spiral_offset(attack.parameter_f, elapsed);
            }
            Archetype::Homing => {
                if let Some(target) = attack.target.and_then(|id| self.world.find_entity(id)) {
                    attack.direction = kinematics::steer(
                        attack.direction,
                        attack.position,
                        target.position,
                        kinematics::HOMING_BLEND_PER_TICK,
                    );
                }
                attack.position = kinematics::step_linear(attack.position, attack.direction, attack.speed, dt);
            }
            Archetype::EasedGrowth => {
                attack.position = kinematics::step_linear(attack.position, attack.direction, attack.speed, dt);
                let elapsed_ms = attack.ticks as f32 * self.tick_dt * 1000.0;
                attack.radius = GrowthFade::jet().radius(attack.base_radius, elapsed_ms, attack.lifetime_ms);
            }
            Archetype::Stationary => {}
        }
    }

    /// Slot of a distributed orbiter among live siblings with the same owner
    /// and kind. `attack` need not be in the live map.
    fn orbit_slot(&self, attack: &LiveAttack) -> (usize, usize) {
        let siblings = self
            .attacks
            .values()
            .filter(|a| a.owner == attack.owner && a.kind == attack.kind && !a.area)
            .map(|a| (a.id_within_burst, a.attack_id));
        kinematics::orbit_slot((attack.id_within_burst, attack.attack_id), siblings)
    }

    // ─── Change emission ───

    fn alloc_entity(&mut self) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    fn emit(&mut self, change: RowChange) {
        self.world.apply(change.clone());
        self.changes.push(change);
    }

    fn upsert(&mut self, row: Row) {
        let change = match self.world.find_by_index(row.table(), row.key()) {
            Some(old) => RowChange::Update { old, new: row },
            None => RowChange::Insert(row),
        };
        self.emit(change);
    }

    fn remove(&mut self, table: TableId, key: u32) {
        if let Some(old) = self.world.find_by_index(table, key) {
            self.emit(RowChange::Delete(old));
        }
    }

    fn insert_pair(&mut self, entity: EntityRow, row: DependentRow) {
        self.insert_pair_row(entity, row.into_row());
    }

    fn insert_pair_row(&mut self, entity: EntityRow, row: Row) {
        if self.dependent_first {
            self.upsert(row);
            self.upsert(Row::Entity(entity));
        } else {
            self.upsert(Row::Entity(entity));
            self.upsert(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn kinds(changes: &[RowChange]) -> Vec<(TableId, &'static str)> {
        changes
            .iter()
            .map(|c| {
                let op = match c {
                    RowChange::Insert(_) => "insert",
                    RowChange::Update { .. } => "update",
                    RowChange::Delete(_) => "delete",
                };
                (c.table(), op)
            })
            .collect()
    }

    #[test]
    fn world_is_seeded_with_definitions() {
        let sim = WorldSim::new(20);
        assert_eq!(sim.world().game_config().unwrap().tick_rate_ms, 50);
        assert_eq!(sim.world().len(TableId::AttackData), AttackKind::ALL.len());
        let shield = sim.world().find_attack_definition(AttackKind::Shield).unwrap();
        assert_eq!((shield.speed, shield.radius, shield.duration_ms), (200.0, 32.0, 4250));
        assert!((sim.tick_dt() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn dependent_first_reverses_spawn_order() {
        let mut sim = WorldSim::new(20);
        sim.spawn_gem(Vec2::ZERO, GemLevel::Small);
        assert_eq!(
            kinds(&sim.drain_changes()),
            vec![(TableId::Entity, "insert"), (TableId::Gems, "insert")]
        );

        sim.dependent_first = true;
        sim.spawn_gem(Vec2::ZERO, GemLevel::Small);
        assert_eq!(
            kinds(&sim.drain_changes()),
            vec![(TableId::Gems, "insert"), (TableId::Entity, "insert")]
        );
    }

    #[test]
    fn linear_attack_moves_then_expires() {
        let mut sim = WorldSim::new(20);
        let id = sim
            .spawn_attack(AttackSpawn::new(AttackKind::Sword, Vec2::ZERO, Vec2::new(1.0, 0.0)))
            .unwrap();
        let entity = sim.attack_entity(id).unwrap();
        sim.drain_changes();

        sim.step();
        assert_eq!(
            kinds(&sim.drain_changes()),
            vec![(TableId::ActiveAttacks, "update"), (TableId::Entity, "update")]
        );
        let pos = sim.world().find_entity(entity).unwrap().position;
        assert!(pos.approx_eq(Vec2::new(40.0, 0.0), 1e-3));

        // 340 ms at 50 ms per tick: gone on the seventh tick.
        for _ in 0..6 {
            sim.step();
        }
        let tail = kinds(&sim.drain_changes());
        assert_eq!(
            &tail[tail.len() - 2..],
            &[(TableId::ActiveAttacks, "delete"), (TableId::Entity, "delete")]
        );
        assert_eq!(sim.attack_count(), 0);
        assert!(sim.world().find_entity(entity).is_none());
    }

    #[test]
    fn shields_spread_around_owner() {
        let mut sim = WorldSim::new(20);
        let player = sim.spawn_player(Vec2::new(300.0, 300.0));
        let ids: Vec<u32> = (0..4)
            .map(|i| {
                sim.spawn_attack(
                    AttackSpawn::new(AttackKind::Shield, Vec2::ZERO, Vec2::new(1.0, 0.0))
                        .owned_by(player)
                        .in_burst(i)
                        .phase_degrees(90),
                )
                .unwrap()
            })
            .collect();
        for _ in 0..5 {
            sim.step();
        }

        let r = kinematics::distributed_orbit_radius(PLAYER_RADIUS, 32.0);
        let rate = kinematics::orbit_rate_per_tick(200.0, 0.05);
        for (i, id) in ids.iter().enumerate() {
            let entity = sim.attack_entity(*id).unwrap();
            let pos = sim.world().find_entity(entity).unwrap().position;
            let angle = PI / 2.0 + 2.0 * PI * i as f32 / 4.0 + rate * 5.0;
            let expected = Vec2::new(300.0, 300.0) + Vec2::from_angle(angle) * r;
            assert!(pos.approx_eq(expected, 1e-2), "shield {i}: {pos:?} vs {expected:?}");
        }
    }

    #[test]
    fn scythe_keeps_its_captured_radius() {
        let mut sim = WorldSim::new(20);
        let boss = sim.spawn_player(Vec2::ZERO);
        let id = sim
            .spawn_attack(
                AttackSpawn::new(AttackKind::EnderScythe, Vec2::new(0.0, 150.0), Vec2::new(1.0, 0.0))
                    .owned_by(boss),
            )
            .unwrap();
        for _ in 0..10 {
            sim.step();
        }
        let entity = sim.attack_entity(id).unwrap();
        let pos = sim.world().find_entity(entity).unwrap().position;
        assert!((pos.length() - 150.0).abs() < 1e-2);
        let expected = PI / 2.0 + kinematics::orbit_rate_per_tick(24.0, 0.05) * 10.0;
        assert!((pos.angle() - expected).abs() < 1e-3);
    }

    #[test]
    fn monsters_chase_and_die_into_gems() {
        let mut sim = WorldSim::new(20);
        sim.spawn_player(Vec2::ZERO);
        let rat = sim.spawn_monster(MonsterType::Rat, MonsterVariant::Default, Vec2::new(400.0, 0.0));
        sim.step();
        let Some(Row::Creature(row)) = sim.world().find_by_index(TableId::Monsters, rat) else {
            panic!("rat missing");
        };
        let entity = sim.world().find_entity(row.entity_id).unwrap();
        assert!(entity.position.approx_eq(Vec2::new(396.0, 0.0), 1e-3));
        assert!(entity.is_moving);

        assert_eq!(sim.damage_monster(rat, 4), Some(6));
        assert_eq!(sim.damage_monster(rat, 10), Some(0));
        assert_eq!(sim.monster_count(), 0);
        assert_eq!(sim.world().len(TableId::Gems), 1);
        assert_eq!(sim.damage_monster(rat, 1), None);
    }

    #[test]
    fn legacy_spawn_omits_type_tag() {
        let mut sim = WorldSim::new(20);
        let id = sim
            .spawn_attack(AttackSpawn::new(AttackKind::Wand, Vec2::ZERO, Vec2::new(0.0, 1.0)).legacy())
            .unwrap();
        let Some(Row::Projectile(row)) = sim.world().find_by_index(TableId::ActiveAttacks, id) else {
            panic!("attack missing");
        };
        assert_eq!(row.attack_type, None);
        assert_eq!(row.legacy_type_id, 2);
    }
}
