//! `STUDIO_*` environment variable overrides, applied after file load.

use std::env;

use crate::config::StudioConfig;

/// Apply `STUDIO_<FIELD>` overrides onto an already-loaded config.
/// Unknown or unparseable variables are ignored rather than rejected —
/// this is an override layer, not a strict schema.
pub fn apply_env_overrides(config: &mut StudioConfig) {
    if let Ok(v) = env::var("STUDIO_DATA_DIR") {
        config.data_dir = v;
    }
    if let Ok(v) = parse_env("STUDIO_MAX_CONCURRENT") {
        config.default_limits.max_concurrent = v;
    }
    if let Ok(v) = parse_env("STUDIO_MAX_PER_MINUTE") {
        config.default_limits.max_per_minute = v;
    }
    if let Ok(v) = parse_env("STUDIO_MAX_PER_MONTH") {
        config.default_limits.max_per_month = v;
    }
    if let Ok(v) = parse_env("STUDIO_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = v;
    }
    if let Ok(v) = parse_env("STUDIO_RETRY_BASE_DELAY_MS") {
        config.retry.base_delay_ms = v;
    }
    if let Ok(v) = parse_env("STUDIO_RETRY_MAX_DELAY_MS") {
        config.retry.max_delay_ms = v;
    }
    if let Ok(v) = parse_env("STUDIO_DEDUP_TTL_SECS") {
        config.dedup_ttl_secs = v;
    }
    if let Ok(v) = parse_env("STUDIO_REFRESH_SKEW_SECS") {
        config.refresh_skew_secs = v;
    }
    if let Ok(v) = parse_env("STUDIO_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = v;
    }
    if let Ok(v) = parse_env("STUDIO_EXECUTION_TIMEOUT_MS") {
        config.execution_timeout_ms = v;
    }
    if let Ok(v) = parse_env("STUDIO_ALERT_THRESHOLD_PCT") {
        config.alert_threshold_pct = v;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<T, ()> {
    env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}
