use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// CLI entry point, mirroring the teacher's `server::Args`: a config file
/// path plus a couple of operational overrides a deployer reaches for more
/// often than editing the file.
#[derive(Debug, Parser, Clone)]
#[command(name = "space-mmo-server", version, about)]
pub struct Args {
    /// Path to the TOML settings file. Missing file falls back to defaults.
    #[arg(long, default_value = "server.toml")]
    pub config: PathBuf,

    /// Overrides `udp_port` from the config file.
    #[arg(long)]
    pub bind: Option<u16>,

    /// Path to a persisted snapshot to load at boot and save to later.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

/// Every field enumerated in §6's Configuration table, plus the handful of
/// ambient fields a complete implementation needs that the distillation's
/// enumeration left implicit (documented in `DESIGN.md`'s Open Question
/// resolutions): `min_update_hz`, `aoi_load_factor`, `max_frames_per_tick`,
/// `malformed_frame_threshold`, `sanity_audit_timeout_ms`,
/// `sanity_failure_window_ms`, `sanity_max_failures`, and
/// `autosave_interval_s`.
///
/// Settings are read-mostly: a running tick reads an immutable snapshot
/// taken at its start, and `set_settings` only ever stages a replacement for
/// the *next* tick boundary (§9's "Shared mutable configuration").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub max_players: u32,
    pub udp_port: u16,
    pub tick_hz: f64,
    pub update_hz: f64,
    pub aoi_radius_default: f64,
    pub aoi_capacity_default: u32,
    pub sanity_sample_period: u32,
    pub reliable_resend_interval_ms: u64,
    pub max_reliable_resends: u32,
    pub heartbeat_interval_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub sim_speed: f64,
    pub binary_compression: bool,
    pub binary_encryption: bool,
    pub log_level: LogLevel,

    /// Floor of `update_hz`'s load-based clamp (§4.6's `clamp(..., min_hz,
    /// base_hz)`); `update_hz` above doubles as `base_hz`.
    pub min_update_hz: f64,
    /// `k_load` in §4.6's `update_hz = clamp(base_hz * (1 - load*k_load), ...)`.
    pub aoi_load_factor: f64,
    /// Bounds step 1 of the tick (§4.8) so a flood of inbound datagrams
    /// cannot starve celestial/AOI/audit work within one tick.
    pub max_frames_per_tick: u32,
    /// Consecutive malformed frames from one peer before it is disconnected
    /// (§7's "on threshold, peer is disconnected").
    pub malformed_frame_threshold: u32,
    /// How long a sanity challenge waits for `CheckResponse` before being
    /// treated as a failure (§4.7: "within 5s").
    pub sanity_audit_timeout_ms: u64,
    /// The window over which repeated sanity failures accumulate before a
    /// peer is marked for disconnection (§4.7).
    pub sanity_failure_window_ms: u64,
    pub sanity_max_failures: u32,
    /// Auto-save interval for the persisted snapshot (§6).
    pub autosave_interval_s: u64,
    /// `v_max` in §3/§4.4's kinematic bounds: the maximum speed any entity
    /// may report.
    pub v_max: f64,
    /// Slack multiplier on `v_max * dt_since_last` when bounding a client's
    /// reported displacement (§4.4), absorbing network jitter.
    pub position_update_tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_players: 200,
            udp_port: 7777,
            tick_hz: 30.0,
            update_hz: 20.0,
            aoi_radius_default: 5_000.0,
            aoi_capacity_default: 64,
            sanity_sample_period: 20,
            reliable_resend_interval_ms: 200,
            max_reliable_resends: 8,
            heartbeat_interval_ms: 2_000,
            disconnect_timeout_ms: 10_000,
            sim_speed: 1.0,
            binary_compression: false,
            binary_encryption: false,
            log_level: LogLevel::Info,
            min_update_hz: 4.0,
            aoi_load_factor: 0.75,
            max_frames_per_tick: 2_048,
            malformed_frame_threshold: 8,
            sanity_audit_timeout_ms: 5_000,
            sanity_failure_window_ms: 30_000,
            sanity_max_failures: 3,
            autosave_interval_s: 300,
            v_max: 500.0,
            position_update_tolerance: 1.5,
        }
    }
}

impl Settings {
    /// Validates cross-field invariants an admin mutation (§7's
    /// `ConfigError`) must not be allowed to break.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_hz <= 0.0 {
            return Err("tick_hz must be positive".into());
        }
        if self.update_hz <= 0.0 {
            return Err("update_hz must be positive".into());
        }
        if self.min_update_hz <= 0.0 || self.min_update_hz > self.update_hz {
            return Err("min_update_hz must be positive and <= update_hz".into());
        }
        if !(0.0..=1.0).contains(&self.aoi_load_factor) {
            return Err("aoi_load_factor must be in [0, 1]".into());
        }
        if self.aoi_capacity_default == 0 {
            return Err("aoi_capacity_default must be positive".into());
        }
        if self.sanity_sample_period == 0 {
            return Err("sanity_sample_period must be positive".into());
        }
        if self.v_max <= 0.0 {
            return Err("v_max must be positive".into());
        }
        Ok(())
    }
}

/// Loads settings from `path`, falling back to [`Settings::default`] when
/// the file does not exist (matching the teacher's `load_config`).
pub fn load_config(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = load_config(Path::new("/nonexistent/server.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn default_settings_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_tick_hz_is_rejected() {
        let mut s = Settings::default();
        s.tick_hz = 0.0;
        assert!(s.validate().is_err());
    }
}
