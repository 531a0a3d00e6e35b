//! Configuration loading
//!
//! Settings come from a TOML file with serde-supplied defaults; the service
//! binary layers CLI arguments and environment variables on top (highest
//! priority first: CLI, env, file, compiled default).

use crate::calendar::{parse_weekday, Calendar};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Check-in service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP/SSE server binds to
    pub bind_addr: String,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Group timezone as a UTC offset in minutes (e.g. -300 for UTC-5)
    pub utc_offset_minutes: i32,
    /// Weekly meeting day anchoring streak weeks
    pub anchor_weekday: String,
    /// Seconds without a heartbeat before a member implicitly leaves
    pub heartbeat_timeout_secs: u64,
    /// How often the presence sweeper checks for expired members
    pub sweep_interval_secs: u64,
    /// Late margin applied when creating windows without an explicit one
    pub default_late_margin_min: i64,
    /// Per-room broadcast channel capacity
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5750".to_string(),
            db_path: PathBuf::from("koinonia.db"),
            utc_offset_minutes: 0,
            anchor_weekday: "sunday".to_string(),
            heartbeat_timeout_secs: 30,
            sweep_interval_secs: 10,
            default_late_margin_min: 30,
            event_buffer: 100,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file is absent. A present-but-invalid file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Build the boundary calendar from the configured offset and anchor day
    pub fn calendar(&self) -> Result<Calendar> {
        Calendar::new(self.utc_offset_minutes, parse_weekday(&self.anchor_weekday)?)
    }
}
