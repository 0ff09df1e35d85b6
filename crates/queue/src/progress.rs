//! Status-message rendering.
//!
//! [`render`] is a pure function from request state to message text plus the
//! inline controls to show under it. [`StatusReporter`] pushes those renders to
//! one status message per request and never lets a failed edit escape.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    relay_channels::{MessageHandle, RelayOutbound, StatusControls},
    relay_common::{RequestId, format_bytes},
    relay_download::{ProgressSink, ProgressSnapshot},
    relay_media::UploadProgress,
    tracing::warn,
};

/// Everything a status message can show.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    Queued { position: usize },
    Starting,
    Downloading(ProgressSnapshot),
    Paused(ProgressSnapshot),
    Uploading { part: usize, total: usize },
    Completed { bytes: u64, parts: usize },
    Cancelled,
    Failed { reason: String },
}

/// Text and controls for `status` of request `id` named `name`.
pub fn render(name: &str, id: RequestId, status: &RequestStatus) -> (String, StatusControls) {
    match status {
        RequestStatus::Queued { position: 0 } => {
            (format!("⏳ {name}\nQueued"), StatusControls::None)
        },
        RequestStatus::Queued { position } => (
            format!("⏳ {name}\nQueued, position {position}"),
            StatusControls::None,
        ),
        RequestStatus::Starting => (
            format!("⬇️ {name}\nConnecting…"),
            StatusControls::PauseCancel(id),
        ),
        RequestStatus::Downloading(snapshot) => (
            format!("⬇️ {name}\n{}", progress_line(snapshot)),
            StatusControls::PauseCancel(id),
        ),
        RequestStatus::Paused(snapshot) => {
            let at = match snapshot.total {
                Some(total) => format!(
                    "{} / {}",
                    format_bytes(snapshot.downloaded),
                    format_bytes(total)
                ),
                None => format_bytes(snapshot.downloaded),
            };
            (
                format!("⏸ {name}\nPaused at {at}"),
                StatusControls::ResumeCancel(id),
            )
        },
        RequestStatus::Uploading { total: 1, .. } => {
            (format!("⬆️ {name}\nUploading…"), StatusControls::None)
        },
        RequestStatus::Uploading { part, total } => (
            format!("⬆️ {name}\nUploading part {part} of {total}…"),
            StatusControls::None,
        ),
        RequestStatus::Completed { bytes, parts: 1 } => (
            format!("✅ {name}\nDone, {}", format_bytes(*bytes)),
            StatusControls::None,
        ),
        RequestStatus::Completed { bytes, parts } => (
            format!("✅ {name}\nDone, {} in {parts} parts", format_bytes(*bytes)),
            StatusControls::None,
        ),
        RequestStatus::Cancelled => (format!("✖️ {name}\nCancelled"), StatusControls::None),
        RequestStatus::Failed { reason } => (
            format!("⚠️ {name}\nFailed: {reason}"),
            StatusControls::None,
        ),
    }
}

fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let speed = format!("{}/s", format_bytes(snapshot.speed() as u64));
    match (snapshot.total, snapshot.percent()) {
        (Some(total), Some(percent)) => {
            let eta = snapshot
                .eta()
                .map_or_else(|| "?".to_string(), format_eta);
            format!(
                "{percent:.1}% · {} / {} · {speed} · ETA {eta}",
                format_bytes(snapshot.downloaded),
                format_bytes(total)
            )
        },
        _ => format!("{} · {speed}", format_bytes(snapshot.downloaded)),
    }
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m{s:02}s"),
        (h, m, _) => format!("{h}h{m:02}m"),
    }
}

/// Keeps one request's status message up to date.
pub struct StatusReporter {
    outbound: Arc<dyn RelayOutbound>,
    handle: MessageHandle,
    request: RequestId,
    name: String,
}

impl StatusReporter {
    pub fn new(
        outbound: Arc<dyn RelayOutbound>,
        handle: MessageHandle,
        request: RequestId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            outbound,
            handle,
            request,
            name: name.into(),
        }
    }

    /// Same message, different display name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            outbound: Arc::clone(&self.outbound),
            handle: self.handle,
            request: self.request,
            name: name.into(),
        }
    }

    /// Edit the status message. "Not modified" is expected and ignored;
    /// other failures are logged.
    pub async fn show(&self, status: &RequestStatus) {
        let (text, controls) = render(&self.name, self.request, status);
        match self.outbound.edit_status(self.handle, &text, controls).await {
            Ok(()) => {},
            Err(e) if e.is_not_modified() => {},
            Err(e) => warn!(
                request = %self.request,
                message_id = self.handle.message_id,
                error = %e,
                "status update failed"
            ),
        }
    }
}

#[async_trait]
impl ProgressSink for StatusReporter {
    async fn report(&self, snapshot: ProgressSnapshot) {
        self.show(&RequestStatus::Downloading(snapshot)).await;
    }
}

#[async_trait]
impl UploadProgress for StatusReporter {
    async fn uploading(&self, part: usize, total: usize) {
        self.show(&RequestStatus::Uploading { part, total }).await;
    }
}
