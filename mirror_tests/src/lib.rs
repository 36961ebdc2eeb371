//! In-process mirror harness.
//!
//! Wires a `WorldSim` straight into a client `ReplicaCache` and a
//! `VisualSubsystem`, with no socket in between. Ticks and frames are
//! driven explicitly so tests can compare predicted visuals against the
//! host's rows at any point. Visual events are drained into running totals
//! after every frame.

use mirror_client::{registry::VisualHandle, VisualSubsystem};
use mirror_host::WorldSim;
use mirror_shared::{
    config::MirrorConfig,
    event::EventCounts,
    math::Vec2,
    render::RenderBackend,
    rows::{EntityId, VisualKey},
    store::{ReplicaCache, ReplicaSource},
};

pub struct LocalMirror<B: RenderBackend> {
    pub sim: WorldSim,
    pub cache: ReplicaCache,
    pub visuals: VisualSubsystem<B>,
    frames_per_tick: u32,
    now_ms: f64,
    frames: u64,
    events: EventCounts,
}

impl<B: RenderBackend> LocalMirror<B> {
    /// Seeds the client cache from `sim` and initializes the visuals.
    pub fn new(cfg: MirrorConfig, backend: B, mut sim: WorldSim) -> Self {
        let mut cache = ReplicaCache::new();
        cache.load_rows(sim.world().all_rows());
        sim.drain_changes();

        let frames_per_tick = (cfg.frame_hz / cfg.tick_hz.max(1)).max(1);
        let mut visuals = VisualSubsystem::new(cfg, backend);
        visuals.initialize(&cache);
        Self {
            sim,
            cache,
            visuals,
            frames_per_tick,
            now_ms: 0.0,
            frames: 0,
            events: EventCounts::default(),
        }
    }

    pub fn frames_per_tick(&self) -> u32 {
        self.frames_per_tick
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn events(&self) -> EventCounts {
        self.events
    }

    /// Copies pending host changes into the client cache.
    pub fn sync(&mut self) -> usize {
        let changes = self.sim.drain_changes();
        let n = changes.len();
        for change in changes {
            self.cache.apply(change);
        }
        n
    }

    /// Applies one client change at a time, pumping the visuals after each.
    pub fn sync_one_by_one(&mut self) -> usize {
        let changes = self.sim.drain_changes();
        let n = changes.len();
        for change in changes {
            self.cache.apply(change);
            self.visuals.pump(&self.cache);
        }
        n
    }

    /// One client frame of `1 / frames_per_tick` of a tick.
    pub fn frame(&mut self) {
        let delta_ms = self.sim.tick_dt() * 1000.0 / self.frames_per_tick as f32;
        self.now_ms += f64::from(delta_ms);
        self.frames += 1;
        self.visuals.update(&self.cache, self.now_ms, delta_ms);
        self.events.drain_from(self.visuals.events_mut());
    }

    /// Host tick, sync, then a tick's worth of frames.
    pub fn run_tick(&mut self) {
        self.sim.step();
        self.sync();
        for _ in 0..self.frames_per_tick {
            self.frame();
        }
    }

    pub fn host_position(&self, entity: EntityId) -> Option<Vec2> {
        self.sim.entity_position(entity)
    }

    pub fn visual(&self, key: VisualKey) -> Option<&VisualHandle> {
        self.visuals.registry().get(key)
    }

    /// Distance between a visual's predicted position and its host entity.
    pub fn divergence(&self, key: VisualKey) -> Option<f32> {
        let handle = self.visual(key)?;
        let host = self.host_position(handle.entity_id)?;
        Some(handle.predicted.distance_sq(host).sqrt())
    }
}
