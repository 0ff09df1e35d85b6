use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["relay.toml", "relay.yaml", "relay.yml", "relay.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relay/relay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found or the file
/// fails to parse; env overrides still apply afterwards.
pub fn discover_and_load() -> RelayConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RelayConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            RelayConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply `RELAY_*` overrides on top of a loaded config.
///
/// - `RELAY_TELEGRAM_TOKEN` → `telegram.token`
/// - `RELAY_WORK_DIR` → `download.work_dir`
/// - `RELAY_DAILY_LIMIT` → `quota.daily_limit` (ignored if not a number)
pub fn apply_env_overrides(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("RELAY_TELEGRAM_TOKEN").filter(|t| !t.is_empty()) {
        config.telegram.token = Secret::new(token);
    }
    if let Some(dir) = lookup("RELAY_WORK_DIR").filter(|d| !d.is_empty()) {
        config.download.work_dir = Some(PathBuf::from(dir));
    }
    if let Some(raw) = lookup("RELAY_DAILY_LIMIT") {
        match raw.parse() {
            Ok(limit) => config.quota.daily_limit = limit,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid RELAY_DAILY_LIMIT"),
        }
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/relay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relay").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory used for working files and quota.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "relay")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".relay"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
