//! Layered TOML + `STUDIO_*` environment-variable configuration (spec §6,
//! §9 "12-factor-ish configuration"). Load order: env overrides file
//! overrides defaults.

pub mod config;
pub mod env;

pub use config::{load_config, load_from_file, ConfigError, DefaultLimits, RetryConfig, StudioConfig};
