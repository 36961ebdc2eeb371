//! Replica host.
//!
//! An authoritative fixed-tick loop that streams row changes. It supports:
//! - A TCP handshake (Hello, Welcome, Snapshot)
//! - Per-tick `Change` frames followed by a `Tick` marker
//! - In-process subscribers through any `FeedSink`
//! - A seeded demo scene
//!
//! Determinism notes:
//! - The simulation never reads the wall clock; only `Tick` markers carry
//!   a timestamp.
//! - Subscribers receive frames in the order the simulation emitted them.

use std::{
    f32::consts::TAU,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use mirror_shared::{
    config::MirrorConfig,
    math::Vec2,
    net::{ClientId, FeedListener, FeedMsg, FeedSink, ReliableConn, PROTOCOL_VERSION},
    rows::{AttackKind, EntityId, GemLevel, MonsterType, MonsterVariant},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sim::{AttackSpawn, WorldSim};

/// A client that stalls its handshake longer than this is dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Subscriber {
    id: ClientId,
    sink: Box<dyn FeedSink>,
    peer: Option<SocketAddr>,
}

/// Replication host.
pub struct ReplicaHost {
    pub cfg: MirrorConfig,
    sim: WorldSim,
    listener: FeedListener,
    subscribers: Vec<Subscriber>,
    demo: Option<DemoDirector>,
}

impl ReplicaHost {
    /// Binds the feed listener on `cfg.server_addr`.
    pub async fn bind(cfg: MirrorConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FeedListener::bind(addr).await?;
        Ok(Self {
            sim: WorldSim::new(cfg.tick_hz),
            cfg,
            listener,
            subscribers: Vec::new(),
            demo: None,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn sim(&self) -> &WorldSim {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut WorldSim {
        &mut self.sim
    }

    pub fn tick(&self) -> u64 {
        self.sim.tick()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Populates the demo scene and keeps it busy on every step.
    pub fn enable_demo(&mut self, seed: u64) -> anyhow::Result<()> {
        let mut demo = DemoDirector::new(seed);
        demo.populate(&mut self.sim)?;
        self.demo = Some(demo);
        Ok(())
    }

    /// Accepts exactly one client and completes its handshake.
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.listener.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match self.listener.accept_timeout(timeout).await? {
            Some((conn, peer)) => self.handle_new_connection(conn, peer).await.map(Some),
            None => Ok(None),
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
            .await
            .context("handshake timed out")??;
        match hello {
            FeedMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                self.attach(Box::new(conn), Some(peer)).await
            }
            FeedMsg::Hello { protocol } => {
                let reason = format!("protocol {protocol} unsupported, host speaks {PROTOCOL_VERSION}");
                conn.send(&FeedMsg::Disconnect { reason: reason.clone() }).await?;
                anyhow::bail!(reason)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Welcomes a subscriber and sends it the full snapshot.
    ///
    /// Changes still queued in the simulation go to existing subscribers
    /// first, so the snapshot never runs ahead of them.
    pub async fn attach(
        &mut self,
        mut sink: Box<dyn FeedSink>,
        peer: Option<SocketAddr>,
    ) -> anyhow::Result<ClientId> {
        self.flush_changes().await;

        let id = ClientId::new_unique();
        sink.deliver(&FeedMsg::Welcome { client_id: id }).await?;
        let rows = self.sim.world().all_rows();
        let row_count = rows.len();
        sink.deliver(&FeedMsg::Snapshot {
            tick: self.sim.tick(),
            rows,
        })
        .await?;

        self.subscribers.push(Subscriber { id, sink, peer });
        info!(client_id = ?id, peer = ?peer, rows = row_count, "Client subscribed");
        Ok(id)
    }

    /// Runs the host for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(self.cfg.tick_dt());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step and publishes its changes.
    pub async fn step(&mut self) -> anyhow::Result<u64> {
        if let Some(demo) = self.demo.as_mut() {
            demo.tick(&mut self.sim)?;
        }
        self.sim.step();
        self.flush_changes().await;

        let tick = self.sim.tick();
        self.broadcast(&FeedMsg::Tick { tick, at: Utc::now() }).await;
        Ok(tick)
    }

    /// Tells every subscriber the feed is closing.
    pub async fn shutdown(&mut self, reason: &str) {
        self.flush_changes().await;
        self.broadcast(&FeedMsg::Disconnect {
            reason: reason.to_string(),
        })
        .await;
        info!(clients = self.subscribers.len(), reason, "Host shutting down");
        self.subscribers.clear();
    }

    async fn flush_changes(&mut self) {
        let tick = self.sim.tick();
        for change in self.sim.drain_changes() {
            self.broadcast(&FeedMsg::Change { tick, change }).await;
        }
    }

    async fn broadcast(&mut self, msg: &FeedMsg) {
        let mut dropped = Vec::new();
        for sub in &mut self.subscribers {
            if let Err(e) = sub.sink.deliver(msg).await {
                warn!(client_id = ?sub.id, peer = ?sub.peer, error = %e, "Dropping subscriber");
                dropped.push(sub.id);
            }
        }
        if !dropped.is_empty() {
            self.subscribers.retain(|s| !dropped.contains(&s.id));
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(ReplicaHost, MirrorConfig)> {
    let mut cfg = MirrorConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let mut host = ReplicaHost::bind(cfg.clone()).await?;
    cfg.server_addr = host.local_addr()?.to_string();
    host.cfg = cfg.clone();
    Ok((host, cfg))
}

const DEMO_CENTER: Vec2 = Vec2::new(3200.0, 3200.0);
const DEMO_WANDER_RADIUS: f32 = 200.0;
const DEMO_MONSTERS: usize = 8;
/// Shields are refreshed just before they expire.
const DEMO_SHIELD_TICKS: u64 = 80;

const DEMO_PLAYER_ATTACKS: [AttackKind; 8] = [
    AttackKind::Sword,
    AttackKind::Wand,
    AttackKind::Knives,
    AttackKind::Football,
    AttackKind::Cards,
    AttackKind::Dumbbell,
    AttackKind::Volleyball,
    AttackKind::Joint,
];

const DEMO_MONSTER_TYPES: [MonsterType; 5] = [
    MonsterType::Rat,
    MonsterType::Slime,
    MonsterType::Orc,
    MonsterType::Imp,
    MonsterType::Bat,
];

/// Drives a small seeded scene so a bare host has something to mirror.
pub struct DemoDirector {
    rng: StdRng,
    player: Option<EntityId>,
    boss: Option<EntityId>,
    ticks: u64,
}

impl DemoDirector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            player: None,
            boss: None,
            ticks: 0,
        }
    }

    pub fn populate(&mut self, sim: &mut WorldSim) -> anyhow::Result<()> {
        let player = sim.spawn_player(DEMO_CENTER + Vec2::new(DEMO_WANDER_RADIUS, 0.0));
        self.player = Some(player);
        self.spawn_shields(sim, player)?;

        for _ in 0..DEMO_MONSTERS {
            self.spawn_monster(sim);
        }
        for i in 0..6 {
            let at = DEMO_CENTER + Vec2::from_angle(i as f32 * TAU / 6.0) * 600.0;
            sim.spawn_gem(at, if i % 3 == 0 { GemLevel::Medium } else { GemLevel::Small });
        }

        let boss_at = DEMO_CENTER + Vec2::new(-900.0, 0.0);
        let boss = sim.spawn_monster(MonsterType::FinalBossPhase1, MonsterVariant::Default, boss_at);
        self.boss = sim.monster_entity(boss);
        sim.spawn_area(AttackKind::VoidZone, DEMO_CENTER + Vec2::new(0.0, 900.0), 199.0, None)?;
        debug!(monsters = sim.monster_count(), "Demo scene populated");
        Ok(())
    }

    pub fn tick(&mut self, sim: &mut WorldSim) -> anyhow::Result<()> {
        self.ticks += 1;
        let Some(player) = self.player else {
            return Ok(());
        };

        let wander = self.ticks as f32 * sim.tick_dt() * 0.5;
        let at = DEMO_CENTER + Vec2::from_angle(wander) * DEMO_WANDER_RADIUS;
        sim.move_player(player, at);

        if self.ticks % DEMO_SHIELD_TICKS == 0 {
            self.spawn_shields(sim, player)?;
        }
        if self.ticks % 5 == 0 {
            let kind = DEMO_PLAYER_ATTACKS[self.rng.gen_range(0..DEMO_PLAYER_ATTACKS.len())];
            let dir = Vec2::from_angle(self.rng.gen_range(0.0..TAU));
            sim.spawn_attack(AttackSpawn::new(kind, at, dir).owned_by(player))?;
        }
        if self.ticks % 40 == 0 {
            self.boss_volley(sim, player)?;
        }
        if self.ticks % 20 == 0 && sim.monster_count() < DEMO_MONSTERS + 1 {
            self.spawn_monster(sim);
        }
        Ok(())
    }

    fn spawn_shields(&mut self, sim: &mut WorldSim, player: EntityId) -> anyhow::Result<()> {
        let phase = self.rng.gen_range(0..360);
        for i in 0..3 {
            sim.spawn_attack(
                AttackSpawn::new(AttackKind::Shield, DEMO_CENTER, Vec2::new(1.0, 0.0))
                    .owned_by(player)
                    .in_burst(i)
                    .phase_degrees(phase),
            )?;
        }
        Ok(())
    }

    fn spawn_monster(&mut self, sim: &mut WorldSim) {
        let kind = DEMO_MONSTER_TYPES[self.rng.gen_range(0..DEMO_MONSTER_TYPES.len())];
        let variant = if self.rng.gen_bool(0.1) {
            MonsterVariant::Shiny
        } else {
            MonsterVariant::Default
        };
        let at = DEMO_CENTER + Vec2::from_angle(self.rng.gen_range(0.0..TAU)) * self.rng.gen_range(700.0..1200.0);
        sim.spawn_monster(kind, variant, at);
    }

    fn boss_volley(&mut self, sim: &mut WorldSim, player: EntityId) -> anyhow::Result<()> {
        let Some(boss) = self.boss else {
            return Ok(());
        };
        let Some(from) = sim.entity_position(boss) else {
            return Ok(());
        };
        let aim = Vec2::from_angle(self.rng.gen_range(0.0..TAU));
        match self.rng.gen_range(0..4) {
            0 => sim.spawn_attack(AttackSpawn::new(AttackKind::EnderBolt, from, aim).owned_by(boss).targeting(player))?,
            1 => sim.spawn_attack(
                AttackSpawn::new(AttackKind::ChaosBall, from, aim)
                    .owned_by(boss)
                    .phase(self.rng.gen_range(0.0..TAU)),
            )?,
            2 => sim.spawn_attack(AttackSpawn::new(AttackKind::AgnaFlamethrowerJet, from, aim).owned_by(boss))?,
            _ => sim.spawn_attack(
                AttackSpawn::new(AttackKind::EnderScythe, from + aim * 150.0, aim).owned_by(boss),
            )?,
        };
        Ok(())
    }
}
