//! Replicated row types.
//!
//! One struct per replicated table. Dependent visual tables reference the
//! `Entity` table by `entity_id`; that row may not have been observed yet.
//! `DependentRow` is the tagged union the client routes on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Key of a row in the `Entity` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Replicated tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableId {
    Entity,
    Gems,
    Monsters,
    ActiveAttacks,
    AreaAttacks,
    AttackData,
    Config,
}

impl TableId {
    pub const ALL: [TableId; 7] = [
        TableId::Entity,
        TableId::Gems,
        TableId::Monsters,
        TableId::ActiveAttacks,
        TableId::AreaAttacks,
        TableId::AttackData,
        TableId::Config,
    ];

    pub fn mask(self) -> TableMask {
        match self {
            TableId::Entity => TableMask::ENTITY,
            TableId::Gems => TableMask::GEMS,
            TableId::Monsters => TableMask::MONSTERS,
            TableId::ActiveAttacks => TableMask::ACTIVE_ATTACKS,
            TableId::AreaAttacks => TableMask::AREA_ATTACKS,
            TableId::AttackData => TableMask::ATTACK_DATA,
            TableId::Config => TableMask::CONFIG,
        }
    }
}

bitflags::bitflags! {
    /// Set of tables a subscriber listens to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TableMask: u32 {
        const ENTITY = 1 << 0;
        const GEMS = 1 << 1;
        const MONSTERS = 1 << 2;
        const ACTIVE_ATTACKS = 1 << 3;
        const AREA_ATTACKS = 1 << 4;
        const ATTACK_DATA = 1 << 5;
        const CONFIG = 1 << 6;

        const DEPENDENT = Self::GEMS.bits()
            | Self::MONSTERS.bits()
            | Self::ACTIVE_ATTACKS.bits()
            | Self::AREA_ATTACKS.bits();
        const DEFINITIONS = Self::ATTACK_DATA.bits() | Self::CONFIG.bits();
    }
}

/// Authoritative position record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub entity_id: EntityId,
    pub position: Vec2,
    /// Unit heading. Gravity projectiles carry their bent, unnormalized heading.
    pub direction: Vec2,
    pub is_moving: bool,
    pub radius: f32,
}

impl EntityRow {
    pub fn at(entity_id: EntityId, position: Vec2) -> Self {
        Self {
            entity_id,
            position,
            direction: Vec2::new(1.0, 0.0),
            is_moving: false,
            radius: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GemLevel {
    Small,
    Medium,
    Large,
    Huge,
    Soul,
    Fries,
    Dice,
    BoosterPack,
}

impl GemLevel {
    pub fn sprite(self) -> &'static str {
        match self {
            GemLevel::Small => "gem_1",
            GemLevel::Medium => "gem_2",
            GemLevel::Large => "gem_3",
            GemLevel::Huge => "gem_4",
            GemLevel::Soul => "soul",
            GemLevel::Fries => "fries",
            GemLevel::Dice => "dice",
            GemLevel::BoosterPack => "booster_pack",
        }
    }
}

/// Row of the `Gems` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRow {
    pub gem_id: u32,
    pub entity_id: EntityId,
    pub level: GemLevel,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonsterType {
    Rat,
    Slime,
    Orc,
    FinalBossPhase1,
    FinalBossPhase2,
    VoidChest,
    Imp,
    Zombie,
    EnderClaw,
    Bat,
}

impl MonsterType {
    pub fn sprite(self) -> &'static str {
        match self {
            MonsterType::Rat => "monster_rat",
            MonsterType::Slime => "monster_slime",
            MonsterType::Orc => "monster_orc",
            MonsterType::FinalBossPhase1 => "final_boss_phase1",
            MonsterType::FinalBossPhase2 => "final_boss_phase2",
            MonsterType::VoidChest => "void_chest",
            MonsterType::Imp => "monster_imp",
            MonsterType::Zombie => "monster_zombie",
            MonsterType::EnderClaw => "monster_ender_claw",
            MonsterType::Bat => "monster_bat",
        }
    }

    pub fn is_boss(self) -> bool {
        matches!(self, MonsterType::FinalBossPhase1 | MonsterType::FinalBossPhase2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonsterVariant {
    Default,
    Shiny,
}

/// Row of the `Monsters` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureRow {
    pub monster_id: u32,
    pub entity_id: EntityId,
    pub bestiary: MonsterType,
    pub variant: MonsterVariant,
    pub hp: u32,
    pub max_hp: u32,
    pub radius: f32,
    pub speed: f32,
}

/// Attack types, player and monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackKind {
    Sword,
    Wand,
    Knives,
    Shield,
    ThunderHorn,
    AngelStaff,
    Football,
    Cards,
    Dumbbell,
    Garlic,
    Volleyball,
    Joint,
    ImpBolt,
    EnderBolt,
    EnderScytheSpawn,
    EnderScythe,
    ChaosBall,
    VoidZone,
    AgnaFlamethrowerJet,
    AgnaOrbSpawn,
    AgnaFireOrb,
    AgnaCandleBolt,
    AgnaPhase2FlameJet,
    AgnaGroundFlame,
}

impl AttackKind {
    pub const ALL: [AttackKind; 24] = [
        AttackKind::Sword,
        AttackKind::Wand,
        AttackKind::Knives,
        AttackKind::Shield,
        AttackKind::ThunderHorn,
        AttackKind::AngelStaff,
        AttackKind::Football,
        AttackKind::Cards,
        AttackKind::Dumbbell,
        AttackKind::Garlic,
        AttackKind::Volleyball,
        AttackKind::Joint,
        AttackKind::ImpBolt,
        AttackKind::EnderBolt,
        AttackKind::EnderScytheSpawn,
        AttackKind::EnderScythe,
        AttackKind::ChaosBall,
        AttackKind::VoidZone,
        AttackKind::AgnaFlamethrowerJet,
        AttackKind::AgnaOrbSpawn,
        AttackKind::AgnaFireOrb,
        AttackKind::AgnaCandleBolt,
        AttackKind::AgnaPhase2FlameJet,
        AttackKind::AgnaGroundFlame,
    ];

    /// Type tag as carried on attack rows.
    pub fn tag(self) -> &'static str {
        match self {
            AttackKind::Sword => "Sword",
            AttackKind::Wand => "Wand",
            AttackKind::Knives => "Knives",
            AttackKind::Shield => "Shield",
            AttackKind::ThunderHorn => "ThunderHorn",
            AttackKind::AngelStaff => "AngelStaff",
            AttackKind::Football => "Football",
            AttackKind::Cards => "Cards",
            AttackKind::Dumbbell => "Dumbbell",
            AttackKind::Garlic => "Garlic",
            AttackKind::Volleyball => "Volleyball",
            AttackKind::Joint => "Joint",
            AttackKind::ImpBolt => "ImpBolt",
            AttackKind::EnderBolt => "EnderBolt",
            AttackKind::EnderScytheSpawn => "EnderScytheSpawn",
            AttackKind::EnderScythe => "EnderScythe",
            AttackKind::ChaosBall => "ChaosBall",
            AttackKind::VoidZone => "VoidZone",
            AttackKind::AgnaFlamethrowerJet => "AgnaFlamethrowerJet",
            AttackKind::AgnaOrbSpawn => "AgnaOrbSpawn",
            AttackKind::AgnaFireOrb => "AgnaFireOrb",
            AttackKind::AgnaCandleBolt => "AgnaCandleBolt",
            AttackKind::AgnaPhase2FlameJet => "AgnaPhase2FlameJet",
            AttackKind::AgnaGroundFlame => "AgnaGroundFlame",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Numeric id used by rows that predate type tags.
    /// Player attacks are 1..=12, monster attacks 101..=112.
    pub fn legacy_id(self) -> u32 {
        let idx = Self::ALL
            .iter()
            .position(|k| *k == self)
            .unwrap_or_default() as u32;
        if idx < 12 {
            idx + 1
        } else {
            101 + (idx - 12)
        }
    }

    pub fn from_legacy_id(id: u32) -> Option<Self> {
        let idx = match id {
            1..=12 => id - 1,
            101..=112 => id - 101 + 12,
            _ => return None,
        };
        Self::ALL.get(idx as usize).copied()
    }

    pub fn sprite(self) -> String {
        format!("attack_{}", self.tag().to_lowercase())
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Row of the `ActiveAttacks` table (moving attacks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileRow {
    pub attack_id: u32,
    pub entity_id: EntityId,
    /// Entity the attack orbits around, when it orbits.
    pub owner_entity_id: Option<EntityId>,
    /// Entity a homing attack steers toward.
    pub target_entity_id: Option<EntityId>,
    /// Type tag. Older rows leave it empty and carry only `legacy_type_id`.
    pub attack_type: Option<String>,
    pub legacy_type_id: u32,
    pub id_within_burst: u32,
    /// Orbit phase in degrees.
    pub parameter_u: u32,
    /// Orbit phase in radians for attacks that keep their own angle.
    pub parameter_f: f32,
    pub ticks_elapsed: u32,
    pub radius: f32,
}

/// Row of the `AreaAttacks` table (zones that do not travel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaAttackRow {
    pub attack_id: u32,
    pub entity_id: EntityId,
    pub owner_entity_id: Option<EntityId>,
    pub attack_type: Option<String>,
    pub legacy_type_id: u32,
    pub radius: f32,
    pub ticks_elapsed: u32,
}

/// Row of the `AttackData` definition table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackDefinition {
    pub kind: AttackKind,
    pub speed: f32,
    pub radius: f32,
    pub duration_ms: u32,
}

/// Row of the `Config` definition table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfigRow {
    pub id: u32,
    pub tick_rate_ms: u32,
    pub world_size: u32,
}

impl Default for ConfigRow {
    fn default() -> Self {
        Self {
            id: 0,
            tick_rate_ms: 50,
            world_size: 6400,
        }
    }
}

/// Identifier of a live or pending visual: kind plus the row's own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VisualKey {
    Pickup(u32),
    Creature(u32),
    Projectile(u32),
    AreaAttack(u32),
}

impl fmt::Display for VisualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisualKey::Pickup(id) => write!(f, "pickup#{id}"),
            VisualKey::Creature(id) => write!(f, "creature#{id}"),
            VisualKey::Projectile(id) => write!(f, "projectile#{id}"),
            VisualKey::AreaAttack(id) => write!(f, "area#{id}"),
        }
    }
}

/// A row that renders as a visual bound to an `Entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependentRow {
    Pickup(PickupRow),
    Creature(CreatureRow),
    Projectile(ProjectileRow),
    AreaAttack(AreaAttackRow),
}

impl DependentRow {
    pub fn key(&self) -> VisualKey {
        match self {
            DependentRow::Pickup(r) => VisualKey::Pickup(r.gem_id),
            DependentRow::Creature(r) => VisualKey::Creature(r.monster_id),
            DependentRow::Projectile(r) => VisualKey::Projectile(r.attack_id),
            DependentRow::AreaAttack(r) => VisualKey::AreaAttack(r.attack_id),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            DependentRow::Pickup(r) => r.entity_id,
            DependentRow::Creature(r) => r.entity_id,
            DependentRow::Projectile(r) => r.entity_id,
            DependentRow::AreaAttack(r) => r.entity_id,
        }
    }

    pub fn into_row(self) -> Row {
        match self {
            DependentRow::Pickup(r) => Row::Pickup(r),
            DependentRow::Creature(r) => Row::Creature(r),
            DependentRow::Projectile(r) => Row::Projectile(r),
            DependentRow::AreaAttack(r) => Row::AreaAttack(r),
        }
    }
}

/// Any replicated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Row {
    Entity(EntityRow),
    Pickup(PickupRow),
    Creature(CreatureRow),
    Projectile(ProjectileRow),
    AreaAttack(AreaAttackRow),
    AttackData(AttackDefinition),
    Config(ConfigRow),
}

impl Row {
    pub fn table(&self) -> TableId {
        match self {
            Row::Entity(_) => TableId::Entity,
            Row::Pickup(_) => TableId::Gems,
            Row::Creature(_) => TableId::Monsters,
            Row::Projectile(_) => TableId::ActiveAttacks,
            Row::AreaAttack(_) => TableId::AreaAttacks,
            Row::AttackData(_) => TableId::AttackData,
            Row::Config(_) => TableId::Config,
        }
    }

    /// Primary key within the row's table.
    pub fn key(&self) -> u32 {
        match self {
            Row::Entity(r) => r.entity_id.0,
            Row::Pickup(r) => r.gem_id,
            Row::Creature(r) => r.monster_id,
            Row::Projectile(r) => r.attack_id,
            Row::AreaAttack(r) => r.attack_id,
            Row::AttackData(r) => r.kind.legacy_id(),
            Row::Config(r) => r.id,
        }
    }

    pub fn as_dependent(&self) -> Option<DependentRow> {
        match self {
            Row::Pickup(r) => Some(DependentRow::Pickup(r.clone())),
            Row::Creature(r) => Some(DependentRow::Creature(r.clone())),
            Row::Projectile(r) => Some(DependentRow::Projectile(r.clone())),
            Row::AreaAttack(r) => Some(DependentRow::AreaAttack(r.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_kind_legacy_ids_roundtrip() {
        for kind in AttackKind::ALL {
            assert_eq!(AttackKind::from_legacy_id(kind.legacy_id()), Some(kind));
        }
        assert_eq!(AttackKind::Sword.legacy_id(), 1);
        assert_eq!(AttackKind::Joint.legacy_id(), 12);
        assert_eq!(AttackKind::ImpBolt.legacy_id(), 101);
        assert_eq!(AttackKind::from_legacy_id(0), None);
        assert_eq!(AttackKind::from_legacy_id(13), None);
    }

    #[test]
    fn attack_kind_tags() {
        assert_eq!(AttackKind::from_tag("Shield"), Some(AttackKind::Shield));
        assert_eq!(AttackKind::from_tag("shield"), None);
    }

    #[test]
    fn dependent_keys_are_per_kind() {
        let gem = DependentRow::Pickup(PickupRow {
            gem_id: 7,
            entity_id: EntityId(1),
            level: GemLevel::Small,
            value: 1,
        });
        let zone = DependentRow::AreaAttack(AreaAttackRow {
            attack_id: 7,
            entity_id: EntityId(2),
            owner_entity_id: None,
            attack_type: Some("VoidZone".into()),
            legacy_type_id: 0,
            radius: 199.0,
            ticks_elapsed: 0,
        });
        assert_ne!(gem.key(), zone.key());
        assert_eq!(gem.into_row().table(), TableId::Gems);
    }

    #[test]
    fn dependent_mask_covers_visual_tables() {
        for table in [TableId::Gems, TableId::Monsters, TableId::ActiveAttacks, TableId::AreaAttacks] {
            assert!(TableMask::DEPENDENT.contains(table.mask()));
        }
        assert!(!TableMask::DEPENDENT.contains(TableMask::ENTITY));
    }
}
