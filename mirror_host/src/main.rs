//! Standalone host binary.
//!
//! Usage:
//!   cargo run -p mirror_host -- [--addr 127.0.0.1:40100] [--tick-hz 20] [--seed 1]
//!                               [--config mirror.json] [--ticks N] [--dependent-first]
//!
//! The host runs a seeded demo scene at a fixed tick, accepts feed clients
//! and streams every row change to them.

use std::{env, time::Duration};

use anyhow::Context;
use mirror_host::host::ReplicaHost;
use mirror_shared::config::MirrorConfig;
use tracing::info;

struct Args {
    cfg: MirrorConfig,
    seed: u64,
    max_ticks: Option<u64>,
    dependent_first: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => MirrorConfig::load(&args[i + 1])?,
        _ => MirrorConfig::default(),
    };
    let mut seed = 1;
    let mut max_ticks = None;
    let mut dependent_first = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                max_ticks = Some(args[i + 1].parse().context("parse --ticks")?);
                i += 2;
            }
            "--dependent-first" => {
                dependent_first = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args {
        cfg,
        seed,
        max_ticks,
        dependent_first,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        cfg,
        seed,
        max_ticks,
        dependent_first,
    } = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, seed, dependent_first, "Starting host");

    let mut host = ReplicaHost::bind(cfg.clone()).await.context("bind host")?;
    host.sim_mut().dependent_first = dependent_first;
    host.enable_demo(seed).context("populate demo")?;
    let local = host.local_addr()?;
    info!(%local, "Host listening");

    let tick_interval = Duration::from_secs_f32(cfg.tick_dt());
    let stats_every = u64::from(cfg.tick_hz.max(1)) * 5;
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        match host.try_accept(Duration::from_millis(1)).await {
            Ok(Some(cid)) => info!(client_id = ?cid, "New client accepted"),
            Ok(None) => {}
            Err(e) => info!(error = %e, "Handshake failed"),
        }

        let tick = host.step().await?;
        if tick % stats_every == 0 {
            let sim = host.sim();
            info!(
                tick,
                clients = host.subscriber_count(),
                attacks = sim.attack_count(),
                monsters = sim.monster_count(),
                "Host stats"
            );
        }
        if max_ticks.is_some_and(|max| tick >= max) {
            host.shutdown("host stopping").await;
            return Ok(());
        }

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
