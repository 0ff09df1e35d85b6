//! Semantic validation of a loaded config.
//!
//! Parsing already rejects malformed files; this pass catches values that
//! parse fine but cannot work at runtime.

use secrecy::ExposeSecret;

use crate::schema::RelayConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "upload.safety_margin_bytes"
    pub path: &'static str,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn error(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path,
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path,
            message: message.into(),
        });
    }
}

pub fn validate(config: &RelayConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.telegram.token.expose_secret().trim().is_empty() {
        result.error(
            "telegram.token",
            "bot token is required (set it in the config or RELAY_TELEGRAM_TOKEN)",
        );
    }

    let upload = &config.upload;
    if upload.safety_margin_bytes >= upload.transport_limit_bytes {
        result.error(
            "upload.safety_margin_bytes",
            format!(
                "margin ({}) must be smaller than transport_limit_bytes ({})",
                upload.safety_margin_bytes, upload.transport_limit_bytes
            ),
        );
    }

    if config.download.progress_interval_secs == 0 {
        result.error(
            "download.progress_interval_secs",
            "must be at least 1 second; the transport rate-limits message edits",
        );
    }

    if config.segmentation.enabled && config.segmentation.segment_seconds == 0 {
        result.error(
            "segmentation.segment_seconds",
            "must be positive when segmentation is enabled",
        );
    }

    if config.segmentation.enabled && config.segmentation.timeout_secs == 0 {
        result.warning(
            "segmentation.timeout_secs",
            "a zero timeout makes every segmentation attempt fall back to byte splitting",
        );
    }

    result
}
