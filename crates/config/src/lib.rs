//! Configuration loading, env substitution, and validation.
//!
//! Config files: `relay.toml`, `relay.yaml`, `relay.yml`, or `relay.json`,
//! searched in `./` then `~/.config/relay/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `RELAY_*`
//! overrides for the values most often injected by a deployment.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{
        DownloadConfig, QuotaConfig, RelayConfig, SegmentationConfig, TelegramConfig,
        UploadConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
