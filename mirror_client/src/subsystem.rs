//! Visual mirror subsystem.
//!
//! The frame driver surface. Owns the registry, the pending store, the exit
//! effects and the event bus, and is handed its render backend and config at
//! construction. Row changes are queued on a subscription and drained at the
//! start of every `update`, on the same thread that renders.

use std::collections::BTreeMap;

use mirror_shared::{
    config::MirrorConfig,
    event::EventBus,
    render::RenderBackend,
    rows::{TableId, TableMask},
    store::{ReplicaSource, Subscription},
};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    correction::CorrectionPolicy,
    pending::PendingStore,
    predict::Predictor,
    registry::VisualRegistry,
    tween::ExitEffects,
};

/// Tables whose rows render as visuals.
const DEPENDENT_TABLES: [TableId; 4] = [
    TableId::Gems,
    TableId::Monsters,
    TableId::ActiveAttacks,
    TableId::AreaAttacks,
];

/// Outcome of the catch-up pass in `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub created: usize,
    pub pending: usize,
    pub skipped: usize,
}

/// Correction outcomes for one archetype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DriftStats {
    pub kept: u64,
    pub snapped: u64,
    pub max_error_sq: f32,
}

impl DriftStats {
    pub(crate) fn record(&mut self, error_sq: f32, snapped: bool) {
        if snapped {
            self.snapped += 1;
        } else {
            self.kept += 1;
        }
        self.max_error_sq = self.max_error_sq.max(error_sq);
    }
}

pub struct VisualSubsystem<B: RenderBackend> {
    pub(crate) config: MirrorConfig,
    pub(crate) backend: B,
    pub(crate) registry: VisualRegistry,
    pub(crate) pending: PendingStore,
    pub(crate) exits: ExitEffects,
    pub(crate) predictor: Predictor,
    pub(crate) policy: CorrectionPolicy,
    pub(crate) events: EventBus,
    pub(crate) drift: BTreeMap<&'static str, DriftStats>,
    subscription: Option<Subscription>,
    last_update_ms: f64,
}

impl<B: RenderBackend> VisualSubsystem<B> {
    pub fn new(config: MirrorConfig, backend: B) -> Self {
        Self {
            predictor: Predictor::new(config.prediction.enabled),
            policy: CorrectionPolicy::from_config(&config.correction),
            exits: ExitEffects::new(config.exit_effect_ms),
            config,
            backend,
            registry: VisualRegistry::new(),
            pending: PendingStore::new(),
            events: EventBus::new(),
            drift: BTreeMap::new(),
            subscription: None,
            last_update_ms: 0.0,
        }
    }

    /// Subscribes to the replicated tables, then catches up on rows that
    /// already exist: each dependent row is created when its entity is
    /// known and parked otherwise.
    pub fn initialize(&mut self, source: &dyn ReplicaSource) -> InitReport {
        let mask = TableMask::ENTITY | TableMask::DEPENDENT | TableMask::DEFINITIONS;
        self.subscription = Some(source.subscribe(mask));

        let mut report = InitReport::default();
        for table in DEPENDENT_TABLES {
            for row in source.snapshot(table) {
                let Some(row) = row.as_dependent() else {
                    continue;
                };
                let key = row.key();
                self.on_dependent_upsert(source, row);
                if self.registry.contains(key) {
                    report.created += 1;
                } else if self.pending.contains_key(key) {
                    report.pending += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }
        info!(
            created = report.created,
            pending = report.pending,
            skipped = report.skipped,
            "visual mirror initialized"
        );
        report
    }

    pub fn is_initialized(&self) -> bool {
        self.subscription.is_some()
    }

    /// Applies queued row changes in arrival order.
    pub fn pump(&mut self, source: &dyn ReplicaSource) -> usize {
        let changes = match &self.subscription {
            Some(sub) => sub.drain(),
            None => return 0,
        };
        for change in &changes {
            self.apply_change(source, change);
        }
        changes.len()
    }

    /// One frame: drain row changes, extrapolate, walk creatures, fade exits.
    pub fn update(&mut self, source: &dyn ReplicaSource, now_ms: f64, delta_ms: f32) {
        let applied = self.pump(source);
        let tick_dt = self.tick_dt(source);
        let dt = delta_ms / 1000.0;

        self.predictor
            .advance(&mut self.registry, source, dt, tick_dt, &mut self.backend);
        self.predictor
            .advance_tweens(&mut self.registry, delta_ms, &mut self.backend);
        let faded = self.exits.advance(delta_ms, &mut self.backend);

        if applied > 0 || !faded.is_empty() {
            debug!(now_ms, applied, faded = faded.len(), live = self.registry.len(), "frame");
        }
        self.last_update_ms = now_ms;
    }

    /// Releases the subscription, every fade and every drawable.
    pub fn shutdown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        let live = self.registry.len();
        self.exits.clear(&mut self.backend);
        self.registry.clear(&mut self.backend);
        self.pending.clear();
        info!(released = live, "visual mirror shut down");
    }

    /// Seconds per authoritative tick: the replicated `Config` row when
    /// present, else the local config.
    pub fn tick_dt(&self, source: &dyn ReplicaSource) -> f32 {
        source
            .game_config()
            .filter(|cfg| cfg.tick_rate_ms > 0)
            .map(|cfg| cfg.tick_rate_ms as f32 / 1000.0)
            .unwrap_or_else(|| self.config.tick_dt())
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn registry(&self) -> &VisualRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn exits(&self) -> &ExitEffects {
        &self.exits
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Correction outcomes keyed by archetype name.
    pub fn drift(&self) -> &BTreeMap<&'static str, DriftStats> {
        &self.drift
    }

    pub fn last_update_ms(&self) -> f64 {
        self.last_update_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_shared::{
        event::VisualEvent,
        math::Vec2,
        render::RecordingRenderer,
        rows::{
            AttackDefinition, AttackKind, ConfigRow, CreatureRow, EntityId, EntityRow, GemLevel,
            MonsterType, MonsterVariant, PickupRow, ProjectileRow, Row, VisualKey,
        },
        store::{ReplicaCache, RowChange},
    };

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn base_cache() -> ReplicaCache {
        let mut cache = ReplicaCache::new();
        cache.apply(RowChange::Insert(Row::Config(ConfigRow::default())));
        cache
    }

    fn add_definition(cache: &mut ReplicaCache, kind: AttackKind, speed: f32, radius: f32, duration_ms: u32) {
        cache.apply(RowChange::Insert(Row::AttackData(AttackDefinition {
            kind,
            speed,
            radius,
            duration_ms,
        })));
    }

    fn entity(id: u32, x: f32, y: f32) -> Row {
        Row::Entity(EntityRow {
            direction: Vec2::new(1.0, 0.0),
            ..EntityRow::at(EntityId(id), Vec2::new(x, y))
        })
    }

    fn gem(id: u32, entity: u32) -> Row {
        Row::Pickup(PickupRow {
            gem_id: id,
            entity_id: EntityId(entity),
            level: GemLevel::Small,
            value: 1,
        })
    }

    fn rat(id: u32, entity: u32, hp: u32) -> Row {
        Row::Creature(CreatureRow {
            monster_id: id,
            entity_id: EntityId(entity),
            bestiary: MonsterType::Rat,
            variant: MonsterVariant::Default,
            hp,
            max_hp: 10,
            radius: 24.0,
            speed: 100.0,
        })
    }

    fn sword(id: u32, entity: u32) -> Row {
        Row::Projectile(ProjectileRow {
            attack_id: id,
            entity_id: EntityId(entity),
            owner_entity_id: None,
            target_entity_id: None,
            attack_type: Some("Sword".into()),
            legacy_type_id: 0,
            id_within_burst: 0,
            parameter_u: 0,
            parameter_f: 0.0,
            ticks_elapsed: 0,
            radius: 32.0,
        })
    }

    fn move_entity(cache: &mut ReplicaCache, id: u32, to: Vec2, is_moving: bool) {
        let Some(old) = cache.find_entity(EntityId(id)) else {
            panic!("entity {id} missing");
        };
        let new = EntityRow {
            position: to,
            is_moving,
            ..old
        };
        cache.apply(RowChange::Update {
            old: Row::Entity(old),
            new: Row::Entity(new),
        });
    }

    fn subsystem() -> VisualSubsystem<RecordingRenderer> {
        VisualSubsystem::new(MirrorConfig::default(), RecordingRenderer::new())
    }

    fn body_position(sys: &VisualSubsystem<RecordingRenderer>, key: VisualKey) -> Option<Vec2> {
        let handle = sys.registry().get(key)?;
        sys.backend().position(handle.resources.body)
    }

    #[test]
    fn catch_up_creates_or_parks() {
        init_tracing();
        let mut cache = base_cache();
        cache.apply(RowChange::Insert(entity(1, 10.0, 10.0)));
        cache.apply(RowChange::Insert(gem(1, 1)));
        cache.apply(RowChange::Insert(gem(2, 2)));

        let mut sys = subsystem();
        let report = sys.initialize(&cache);
        assert_eq!(
            report,
            InitReport {
                created: 1,
                pending: 1,
                skipped: 0
            }
        );
        assert!(sys.pending().contains_key(VisualKey::Pickup(2)));
        assert_eq!(cache.subscriber_count(), 1);
    }

    #[test]
    fn duplicate_inserts_are_idempotent() {
        let mut cache = base_cache();
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Insert(entity(1, 5.0, 5.0)));
        for _ in 0..3 {
            cache.apply(RowChange::Insert(gem(1, 1)));
        }
        sys.update(&cache, 0.0, 16.0);

        assert_eq!(sys.registry().len(), 1);
        assert_eq!(sys.backend().live_count(), 1);
        assert!(sys.pending().is_empty());
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let run = |entity_first: bool| {
            let mut cache = base_cache();
            let mut sys = subsystem();
            sys.initialize(&cache);
            let key = VisualKey::Creature(3);
            if entity_first {
                cache.apply(RowChange::Insert(entity(7, 30.0, 40.0)));
                cache.apply(RowChange::Insert(rat(3, 7, 5)));
            } else {
                cache.apply(RowChange::Insert(rat(3, 7, 5)));
                sys.pump(&cache);
                assert!(sys.pending().contains_key(key));
                assert!(sys.registry().is_empty());
                cache.apply(RowChange::Insert(entity(7, 30.0, 40.0)));
            }
            sys.update(&cache, 0.0, 16.0);
            assert!(sys.pending().is_empty());

            let Some(h) = sys.registry().get(key) else {
                panic!("creature visual missing (entity_first = {entity_first})");
            };
            let bar = h.resources.hp_bar;
            (
                (h.kind, h.entity_id, h.hp, h.max_hp, h.radius, h.speed),
                (h.direction, h.predicted, h.is_moving),
                sys.backend().position(h.resources.body),
                bar.and_then(|b| sys.backend().scale(b)),
                bar.and_then(|b| sys.backend().position(b)),
            )
        };

        let a = run(true);
        let b = run(false);
        assert_eq!(a, b);
        let (_, (_, predicted, _), body, bar_scale, _) = a;
        assert_eq!(predicted, Vec2::new(30.0, 40.0));
        assert_eq!(body, Some(Vec2::new(30.0, 40.0)));
        assert_eq!(bar_scale, Some(Vec2::new(0.5, 1.0)));
    }

    #[test]
    fn resolving_pending_still_corrects_bound_visual() {
        let mut cache = base_cache();
        cache.apply(RowChange::Insert(entity(7, 30.0, 40.0)));
        cache.apply(RowChange::Insert(rat(1, 7, 10)));
        let mut sys = subsystem();
        sys.initialize(&cache);
        let creature = VisualKey::Creature(1);

        let Some(old) = cache.find_entity(EntityId(7)) else {
            panic!("entity 7 missing");
        };
        cache.apply(RowChange::Delete(Row::Entity(old)));
        cache.apply(RowChange::Insert(gem(3, 7)));
        sys.pump(&cache);
        assert!(sys.pending().contains_key(VisualKey::Pickup(3)));
        sys.events_mut().drain::<VisualEvent>();

        cache.apply(RowChange::Insert(entity(7, 700.0, 40.0)));
        sys.pump(&cache);

        assert!(sys.pending().is_empty());
        assert_eq!(sys.registry().get(creature).unwrap().predicted, Vec2::new(700.0, 40.0));
        assert_eq!(body_position(&sys, creature), Some(Vec2::new(700.0, 40.0)));
        assert_eq!(body_position(&sys, VisualKey::Pickup(3)), Some(Vec2::new(700.0, 40.0)));
        let events = sys.events_mut().drain::<VisualEvent>();
        assert!(events.contains(&VisualEvent::Teleported {
            key: creature,
            from: Vec2::new(30.0, 40.0),
            to: Vec2::new(700.0, 40.0),
        }));
    }

    #[test]
    fn pending_resolves_at_entity_position() {
        let mut cache = base_cache();
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Insert(rat(1, 9, 10)));
        sys.update(&cache, 0.0, 16.0);
        assert!(sys.pending().contains_key(VisualKey::Creature(1)));
        assert!(sys.registry().is_empty());

        cache.apply(RowChange::Insert(entity(9, 100.0, 200.0)));
        sys.update(&cache, 16.0, 16.0);
        let handle = sys.registry().get(VisualKey::Creature(1)).unwrap();
        assert_eq!(handle.predicted, Vec2::new(100.0, 200.0));
        assert_eq!(body_position(&sys, VisualKey::Creature(1)), Some(Vec2::new(100.0, 200.0)));
        assert!(sys.pending().is_empty());

        let spawned = sys.events_mut().drain::<VisualEvent>();
        assert_eq!(
            spawned,
            vec![VisualEvent::Spawned {
                key: VisualKey::Creature(1),
                position: Vec2::new(100.0, 200.0)
            }]
        );
    }

    #[test]
    fn pending_keeps_latest_row_per_entity() {
        let mut cache = base_cache();
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Insert(rat(1, 9, 10)));
        cache.apply(RowChange::Update {
            old: rat(1, 9, 10),
            new: rat(1, 9, 4),
        });
        sys.update(&cache, 0.0, 16.0);
        assert_eq!(sys.pending().len(), 1);

        cache.apply(RowChange::Insert(entity(9, 0.0, 0.0)));
        sys.update(&cache, 16.0, 16.0);
        assert_eq!(sys.registry().get(VisualKey::Creature(1)).unwrap().hp, 4);
    }

    #[test]
    fn projectile_error_stays_within_one_tick_of_travel() {
        let mut cache = base_cache();
        add_definition(&mut cache, AttackKind::Sword, 800.0, 32.0, 340);
        cache.apply(RowChange::Insert(entity(10, 0.0, 0.0)));
        cache.apply(RowChange::Insert(sword(1, 10)));

        let mut sys = subsystem();
        sys.initialize(&cache);
        sys.update(&cache, 50.0, 50.0);
        let key = VisualKey::Projectile(1);
        assert!(sys.registry().get(key).unwrap().predicted.approx_eq(Vec2::new(40.0, 0.0), 1e-3));

        let threshold = crate::correction::ProjectileCorrection::threshold(800.0, 0.05);

        move_entity(&mut cache, 10, Vec2::new(45.0, 0.0), true);
        sys.update(&cache, 50.0, 0.0);
        let handle = sys.registry().get(key).unwrap();
        assert!(handle.predicted.approx_eq(Vec2::new(40.0, 0.0), 1e-3));
        assert!(handle.predicted.distance_sq(handle.server) <= threshold);

        move_entity(&mut cache, 10, Vec2::new(200.0, 0.0), true);
        sys.update(&cache, 50.0, 0.0);
        let handle = sys.registry().get(key).unwrap();
        assert_eq!(handle.predicted, Vec2::new(200.0, 0.0));
        assert_eq!(body_position(&sys, key), Some(Vec2::new(200.0, 0.0)));

        let events = sys.events_mut().drain::<VisualEvent>();
        assert!(events
            .iter()
            .any(|e| matches!(e, VisualEvent::Corrected { key: k, .. } if *k == key)));
        let linear = sys.drift().get("linear").copied().unwrap();
        assert_eq!((linear.kept, linear.snapped), (1, 1));
    }

    #[test]
    fn delete_fades_then_destroys() {
        let mut cache = base_cache();
        cache.apply(RowChange::Insert(entity(1, 0.0, 0.0)));
        cache.apply(RowChange::Insert(gem(1, 1)));
        let mut sys = subsystem();
        sys.initialize(&cache);
        let body = sys.registry().get(VisualKey::Pickup(1)).unwrap().resources.body;

        cache.apply(RowChange::Delete(gem(1, 1)));
        sys.update(&cache, 16.0, 0.0);
        assert!(!sys.registry().contains(VisualKey::Pickup(1)));
        assert!(sys.exits().contains(VisualKey::Pickup(1)));
        assert!(sys.backend().is_live(body));

        sys.update(&cache, 116.0, 100.0);
        let half = sys.backend().alpha(body).unwrap();
        assert!((half - 0.5).abs() < 1e-4);

        sys.update(&cache, 216.0, 100.0);
        assert!(!sys.backend().is_live(body));
        assert!(sys.exits().is_empty());
    }

    #[test]
    fn delete_purges_pending_and_ignores_unknown() {
        let mut cache = base_cache();
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Insert(gem(4, 40)));
        cache.apply(RowChange::Delete(gem(4, 40)));
        cache.apply(RowChange::Delete(gem(99, 99)));
        sys.update(&cache, 0.0, 16.0);
        assert!(sys.pending().is_empty());

        cache.apply(RowChange::Insert(entity(40, 0.0, 0.0)));
        sys.update(&cache, 16.0, 16.0);
        assert!(sys.registry().is_empty());
    }

    #[test]
    fn creature_hp_tween_and_teleport() {
        let mut cache = base_cache();
        cache.apply(RowChange::Insert(entity(3, 100.0, 200.0)));
        cache.apply(RowChange::Insert(rat(1, 3, 10)));
        let mut sys = subsystem();
        sys.initialize(&cache);
        let key = VisualKey::Creature(1);
        let res = sys.registry().get(key).unwrap().resources.clone();
        let bar = res.hp_bar.unwrap();

        cache.apply(RowChange::Update {
            old: rat(1, 3, 10),
            new: rat(1, 3, 5),
        });
        sys.update(&cache, 16.0, 16.0);
        assert_eq!(sys.backend().scale(bar), Some(Vec2::new(0.5, 1.0)));
        assert_eq!(sys.backend().position(res.body), Some(Vec2::new(100.0, 200.0)));

        move_entity(&mut cache, 3, Vec2::new(120.0, 200.0), true);
        sys.update(&cache, 66.0, 50.0);
        assert!(sys
            .backend()
            .position(res.body)
            .unwrap()
            .approx_eq(Vec2::new(110.0, 200.0), 1e-3));
        sys.update(&cache, 126.0, 60.0);
        assert_eq!(sys.backend().position(res.body), Some(Vec2::new(120.0, 200.0)));
        assert!(sys.registry().get(key).unwrap().tween.is_none());

        move_entity(&mut cache, 3, Vec2::new(700.0, 200.0), true);
        sys.update(&cache, 142.0, 16.0);
        assert_eq!(sys.backend().position(res.body), Some(Vec2::new(700.0, 200.0)));
        let events = sys.events_mut().drain::<VisualEvent>();
        assert!(events.contains(&VisualEvent::Teleported {
            key,
            from: Vec2::new(120.0, 200.0),
            to: Vec2::new(700.0, 200.0)
        }));
    }

    #[test]
    fn missing_definition_retries_on_next_update() {
        let mut cache = base_cache();
        cache.apply(RowChange::Insert(entity(10, 0.0, 0.0)));
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Insert(sword(1, 10)));
        sys.update(&cache, 0.0, 16.0);
        assert!(sys.registry().is_empty());
        assert!(sys.pending().is_empty());
        assert_eq!(sys.backend().live_count(), 0);

        add_definition(&mut cache, AttackKind::Sword, 800.0, 32.0, 340);
        let Row::Projectile(mut later) = sword(1, 10) else {
            unreachable!()
        };
        later.ticks_elapsed = 1;
        cache.apply(RowChange::Update {
            old: sword(1, 10),
            new: Row::Projectile(later),
        });
        sys.update(&cache, 16.0, 16.0);
        assert!(sys.registry().contains(VisualKey::Projectile(1)));
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut cache = base_cache();
        add_definition(&mut cache, AttackKind::Sword, 800.0, 32.0, 340);
        cache.apply(RowChange::Insert(entity(1, 0.0, 0.0)));
        cache.apply(RowChange::Insert(entity(2, 0.0, 0.0)));
        cache.apply(RowChange::Insert(gem(1, 1)));
        cache.apply(RowChange::Insert(rat(1, 2, 10)));
        cache.apply(RowChange::Insert(gem(2, 77)));
        let mut sys = subsystem();
        sys.initialize(&cache);

        cache.apply(RowChange::Delete(gem(1, 1)));
        sys.update(&cache, 16.0, 16.0);
        assert!(!sys.exits().is_empty());
        assert!(sys.backend().live_count() > 0);

        sys.shutdown();
        assert_eq!(sys.backend().live_count(), 0);
        assert!(sys.registry().is_empty());
        assert!(sys.pending().is_empty());
        assert!(sys.exits().is_empty());
        assert_eq!(cache.subscriber_count(), 0);
        assert!(!sys.is_initialized());
    }
}
