//! Configuration system.
//!
//! Loads mirror configuration from JSON strings or files. Every field has a
//! default so a partial file is enough.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client and host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Host feed address, e.g. `127.0.0.1:40100`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Authoritative tick rate. A replicated `Config` row overrides it.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Client frame rate (client only).
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    /// Fade-out length after a visual's row is deleted. Zero destroys at once.
    #[serde(default = "default_exit_effect_ms")]
    pub exit_effect_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// When off, visuals sit at their last authoritative position.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Creature correction knobs. Projectile thresholds are derived from speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Beyond this distance a creature jumps instead of walking.
    #[serde(default = "default_teleport_distance")]
    pub creature_teleport_distance: f32,
    #[serde(default = "default_tween_ms")]
    pub creature_tween_ms: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            creature_teleport_distance: default_teleport_distance(),
            creature_tween_ms: default_tween_ms(),
        }
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:40100".to_string()
}

fn default_tick_hz() -> u32 {
    20
}

fn default_frame_hz() -> u32 {
    60
}

fn default_exit_effect_ms() -> u32 {
    200
}

fn default_true() -> bool {
    true
}

fn default_teleport_distance() -> f32 {
    200.0
}

fn default_tween_ms() -> u32 {
    100
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            frame_hz: default_frame_hz(),
            prediction: PredictionConfig::default(),
            correction: CorrectionConfig::default(),
            exit_effect_ms: default_exit_effect_ms(),
        }
    }
}

impl MirrorConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Seconds per authoritative tick.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    /// Seconds per client frame.
    pub fn frame_dt(&self) -> f32 {
        1.0 / self.frame_hz.max(1) as f32
    }
}
