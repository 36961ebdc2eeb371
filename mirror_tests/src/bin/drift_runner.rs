//! Drift measurement runner.
//!
//! Runs the seeded demo scene in-process, mirrors it through a headless
//! visual subsystem and writes a JSON report of correction outcomes per
//! archetype.
//!
//! Usage:
//!   cargo run -p mirror_tests --bin drift_runner -- [output-dir] [--ticks 600]
//!                                                   [--seed 1] [--frame-hz 60] [--dependent-first]

use std::{collections::BTreeMap, path::PathBuf, time::Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use mirror_client::subsystem::DriftStats;
use mirror_host::{host::DemoDirector, WorldSim};
use mirror_shared::{config::MirrorConfig, event::EventCounts, render::NullRenderer};
use mirror_tests::LocalMirror;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct DriftReport {
    generated_at: DateTime<Utc>,
    seed: u64,
    ticks: u64,
    frames: u64,
    tick_hz: u32,
    frame_hz: u32,
    dependent_first: bool,
    elapsed_ms: u128,
    live_visuals: usize,
    pending: usize,
    fading: usize,
    events: EventCounts,
    archetypes: BTreeMap<String, ArchetypeDrift>,
}

#[derive(Debug, Serialize)]
struct ArchetypeDrift {
    kept: u64,
    snapped: u64,
    max_error: f32,
}

impl From<&DriftStats> for ArchetypeDrift {
    fn from(s: &DriftStats) -> Self {
        Self {
            kept: s.kept,
            snapped: s.snapped,
            max_error: s.max_error_sq.sqrt(),
        }
    }
}

struct Args {
    output_dir: PathBuf,
    ticks: u64,
    seed: u64,
    frame_hz: u32,
    dependent_first: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        output_dir: PathBuf::from("test-reports"),
        ticks: 600,
        seed: 1,
        frame_hz: 60,
        dependent_first: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ticks" if i + 1 < args.len() => {
                parsed.ticks = args[i + 1].parse().context("parse --ticks")?;
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                parsed.seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                parsed.frame_hz = args[i + 1].parse().context("parse --frame-hz")?;
                i += 2;
            }
            "--dependent-first" => {
                parsed.dependent_first = true;
                i += 1;
            }
            other if !other.starts_with("--") => {
                parsed.output_dir = PathBuf::from(other);
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let cfg = MirrorConfig {
        frame_hz: args.frame_hz,
        ..MirrorConfig::default()
    };
    info!(seed = args.seed, ticks = args.ticks, frame_hz = cfg.frame_hz, "Starting drift run");

    let mut sim = WorldSim::new(cfg.tick_hz);
    sim.dependent_first = args.dependent_first;
    let mut mirror = LocalMirror::new(cfg.clone(), NullRenderer::default(), sim);
    let mut demo = DemoDirector::new(args.seed);
    demo.populate(&mut mirror.sim).context("populate demo")?;

    let started = Instant::now();
    for _ in 0..args.ticks {
        demo.tick(&mut mirror.sim)?;
        mirror.run_tick();
    }

    let visuals = &mirror.visuals;
    let report = DriftReport {
        generated_at: Utc::now(),
        seed: args.seed,
        ticks: mirror.sim.tick(),
        frames: mirror.frames(),
        tick_hz: cfg.tick_hz,
        frame_hz: cfg.frame_hz,
        dependent_first: args.dependent_first,
        elapsed_ms: started.elapsed().as_millis(),
        live_visuals: visuals.registry().len(),
        pending: visuals.pending().len(),
        fading: visuals.exits().len(),
        events: mirror.events(),
        archetypes: visuals
            .drift()
            .iter()
            .map(|(name, stats)| (name.to_string(), ArchetypeDrift::from(stats)))
            .collect(),
    };

    info!(
        spawned = report.events.spawned,
        despawned = report.events.despawned,
        corrected = report.events.corrected,
        teleported = report.events.teleported,
        "Visual events"
    );
    for (archetype, drift) in &report.archetypes {
        info!(
            archetype = %archetype,
            kept = drift.kept,
            snapped = drift.snapped,
            max_error = drift.max_error,
            "Drift"
        );
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("create {}", args.output_dir.display()))?;
    let path = args.output_dir.join("drift-report.json");
    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}
