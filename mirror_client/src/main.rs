//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p mirror_client -- [--addr 127.0.0.1:40100] [--config mirror.json]
//!                                 [--frame-hz 60] [--no-predict] [--frames N]
//!
//! Connects to a host, mirrors its replicated rows as headless visuals and
//! logs mirror stats every few seconds. When the feed drops, visuals freeze
//! and the client shuts down.

use std::{
    env,
    time::{Duration, Instant},
};

use anyhow::Context;
use mirror_client::{
    client::{ClientState, FeedClient},
    subsystem::VisualSubsystem,
};
use mirror_shared::{config::MirrorConfig, event::EventCounts, render::NullRenderer};
use tracing::{debug, info};

struct Args {
    cfg: MirrorConfig,
    max_frames: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => MirrorConfig::load(&args[i + 1])?,
        _ => MirrorConfig::default(),
    };
    let mut max_frames = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                cfg.frame_hz = args[i + 1].parse().context("parse --frame-hz")?;
                i += 2;
            }
            "--frames" if i + 1 < args.len() => {
                max_frames = Some(args[i + 1].parse().context("parse --frames")?);
                i += 2;
            }
            "--no-predict" => {
                cfg.prediction.enabled = false;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, max_frames })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, max_frames } = parse_args()?;
    info!(server = %cfg.server_addr, frame_hz = cfg.frame_hz, predict = cfg.prediction.enabled, "Starting client");

    let mut feed = FeedClient::connect(&cfg).await.context("connect")?;
    let mut visuals = VisualSubsystem::new(cfg.clone(), NullRenderer::default());
    visuals.initialize(feed.cache());

    let frame_interval = Duration::from_secs_f32(cfg.frame_dt());
    let stats_every = u64::from(cfg.frame_hz.max(1)) * 5;
    let started = Instant::now();
    let mut last_frame = started;
    let mut frames: u64 = 0;
    let mut events = EventCounts::default();

    loop {
        feed.poll(Duration::from_millis(1)).await?;
        if feed.state == ClientState::Disconnected {
            info!(tick = feed.last_tick(), "Feed lost; visuals frozen");
            break;
        }

        let now = Instant::now();
        let delta_ms = now.duration_since(last_frame).as_secs_f32() * 1000.0;
        last_frame = now;
        let now_ms = now.duration_since(started).as_secs_f64() * 1000.0;
        visuals.update(feed.cache(), now_ms, delta_ms);
        for event in events.drain_from(visuals.events_mut()) {
            debug!(?event, "Visual event");
        }
        frames += 1;

        if frames % stats_every == 0 {
            info!(
                frames,
                tick = feed.last_tick(),
                changes = feed.changes_applied(),
                live = visuals.registry().len(),
                pending = visuals.pending().len(),
                spawned = events.spawned,
                despawned = events.despawned,
                corrected = events.corrected,
                teleported = events.teleported,
                "Mirror stats"
            );
        }
        if max_frames.is_some_and(|max| frames >= max) {
            feed.disconnect("client done").await?;
            break;
        }

        tokio::time::sleep(frame_interval).await;
    }

    for (archetype, drift) in visuals.drift() {
        info!(
            archetype,
            kept = drift.kept,
            snapped = drift.snapped,
            max_error = drift.max_error_sq.sqrt(),
            "Correction summary"
        );
    }
    visuals.shutdown();
    Ok(())
}
