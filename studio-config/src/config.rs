//! Configuration shape and TOML loading. Load order: env > file > defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 500, max_delay_ms: 30_000, jitter_pct: 0.25 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultLimits {
    pub max_concurrent: u32,
    pub max_per_minute: u32,
    pub max_per_month: u32,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self { max_concurrent: 5, max_per_minute: 60, max_per_month: 100_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// `STUDIO_DATA_DIR` — sled database directory for the durable store.
    pub data_dir: String,
    pub default_limits: DefaultLimits,
    pub retry: RetryConfig,
    /// Default dedup TTL in seconds (spec §4.7, overridable per-trigger).
    pub dedup_ttl_secs: u64,
    /// OAuth refresh skew in seconds (spec §4.4 default 60s).
    pub refresh_skew_secs: i64,
    /// Default per-operation HTTP timeout in ms (spec §5 default 30s).
    pub http_timeout_ms: u64,
    /// Default per-execution timeout in ms (spec §5 default 5 min).
    pub execution_timeout_ms: u64,
    /// Scheduler queue wait timeout in ms (spec §5 default 10 min).
    pub queue_timeout_ms: u64,
    /// Usage alert threshold, percent of limit (spec §4.6 default 80).
    pub alert_threshold_pct: u8,
    /// Alert bucket coalescing window in seconds (spec §4.6 default 1h).
    pub alert_bucket_secs: u64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            default_limits: DefaultLimits::default(),
            retry: RetryConfig::default(),
            dedup_ttl_secs: 7 * 24 * 3600,
            refresh_skew_secs: 60,
            http_timeout_ms: 30_000,
            execution_timeout_ms: 5 * 60_000,
            queue_timeout_ms: 10 * 60_000,
            alert_threshold_pct: 80,
            alert_bucket_secs: 3600,
        }
    }
}

pub fn load_from_file(path: &Path) -> Result<StudioConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load configuration: `path` if given, else `./studio.toml` if present,
/// else defaults — then apply `STUDIO_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<StudioConfig, ConfigError> {
    let default_path = PathBuf::from("studio.toml");
    let resolved = path.unwrap_or(&default_path);

    let mut config = if resolved.exists() { load_from_file(resolved)? } else { StudioConfig::default() };

    crate::env::apply_env_overrides(&mut config);
    Ok(config)
}
