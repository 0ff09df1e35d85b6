//! Config schema: telegram credentials, download/upload tuning, segmentation,
//! and per-user quota.

use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub download: DownloadConfig,
    pub upload: UploadConfig,
    pub segmentation: SegmentationConfig,
    pub quota: QuotaConfig,
}

/// Bot credentials and access.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// Telegram user ids or usernames allowed to use the bot. Empty = open.
    pub allowlist: Vec<String>,

    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("allowlist", &self.allowlist)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            allowlist: Vec::new(),
            poll_timeout_secs: 30,
        }
    }
}

/// Download engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Shared working directory for partial downloads and part files.
    /// Defaults to `<data dir>/work`.
    pub work_dir: Option<PathBuf>,

    /// Minimum seconds between two progress updates of one transfer.
    pub progress_interval_secs: u64,

    pub connect_timeout_secs: u64,

    pub user_agent: String,
}

impl DownloadConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            progress_interval_secs: 3,
            connect_timeout_secs: 30,
            user_agent: concat!("relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Transport upload ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Hard per-message limit of the transport (Bot API: 50 MiB).
    pub transport_limit_bytes: u64,
    /// Headroom kept below the limit for multipart framing and captions.
    pub safety_margin_bytes: u64,
}

impl UploadConfig {
    /// The chunk cap `C`: largest payload sent in a single upload.
    pub fn chunk_cap(&self) -> u64 {
        self.transport_limit_bytes
            .saturating_sub(self.safety_margin_bytes)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            transport_limit_bytes: 50 * 1024 * 1024,
            safety_margin_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Optional ffmpeg time-based segmentation for oversized videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub enabled: bool,
    pub ffmpeg_path: PathBuf,
    pub segment_seconds: u64,
    pub timeout_secs: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            segment_seconds: 300,
            timeout_secs: 600,
        }
    }
}

/// Per-user daily request quota.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Completed requests allowed per user per UTC day. `0` disables quota.
    pub daily_limit: u32,
    /// JSON usage file. Defaults to `<data dir>/quota.json`.
    pub store_path: Option<PathBuf>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_give_45_mib_cap() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.upload.chunk_cap(), 45 * 1024 * 1024);
        assert_eq!(cfg.download.progress_interval(), Duration::from_secs(3));
        assert!(!cfg.segmentation.enabled);
        assert_eq!(cfg.quota.daily_limit, 0);
    }

    #[test]
    fn margin_larger_than_limit_saturates() {
        let upload = UploadConfig {
            transport_limit_bytes: 10,
            safety_margin_bytes: 20,
        };
        assert_eq!(upload.chunk_cap(), 0);
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = TelegramConfig {
            token: Secret::new("123:SECRET".into()),
            ..Default::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("SECRET"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [telegram]
            token = "1:x"

            [upload]
            safety_margin_bytes = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(cfg.telegram.token.expose_secret(), "1:x");
        assert_eq!(cfg.telegram.poll_timeout_secs, 30);
        assert_eq!(cfg.upload.chunk_cap(), 49 * 1024 * 1024);
    }
}
