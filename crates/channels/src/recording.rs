//! In-memory [`RelayOutbound`] that records every call.
//!
//! Uploaded files are read into memory at send time, so tests can check the
//! bytes after the sender has deleted them. Identical consecutive edits are
//! rejected with [`Error::NotModified`] like the real platform does.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicI32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    relay_common::{ConversationId, UploadKind},
};

use crate::{
    action::StatusControls,
    error::{Error, Result},
    outbound::{FileUpload, MessageHandle, RelayOutbound},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Text {
        handle: MessageHandle,
        text: String,
    },
    Edit {
        handle: MessageHandle,
        text: String,
        controls: StatusControls,
    },
    File {
        to: ConversationId,
        file_name: String,
        kind: UploadKind,
        caption: Option<String>,
        bytes: Vec<u8>,
    },
    Delete {
        handle: MessageHandle,
    },
}

#[derive(Default)]
pub struct RecordingOutbound {
    events: Mutex<Vec<Recorded>>,
    last_text: Mutex<HashMap<MessageHandle, String>>,
    next_id: AtomicI32,
    uploads: AtomicUsize,
    /// Zero-based upload index that fails with an external error.
    fail_upload_at: Option<usize>,
    fail_edits: bool,
    /// Messages containing the marker return only after the delay.
    slow_messages: Option<(String, Duration)>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `index`-th upload (zero-based) fail.
    pub fn failing_upload_at(index: usize) -> Self {
        Self {
            fail_upload_at: Some(index),
            ..Self::default()
        }
    }

    /// Reject every status edit, as a flaky or rate-limited platform would.
    pub fn failing_edits() -> Self {
        Self {
            fail_edits: true,
            ..Self::default()
        }
    }

    /// Record sends and edits whose text contains `marker`, then hold the
    /// call for `delay` before returning.
    #[must_use]
    pub fn slow_messages(mut self, marker: &str, delay: Duration) -> Self {
        self.slow_messages = Some((marker.to_string(), delay));
        self
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn files(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Recorded::File { .. }))
            .collect()
    }

    /// Latest text shown on a message, after all edits.
    pub fn current_text(&self, handle: MessageHandle) -> Option<String> {
        self.last_text
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
    }

    fn push(&self, event: Recorded) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    async fn hold_if_slow(&self, text: &str) {
        if let Some((marker, delay)) = &self.slow_messages
            && text.contains(marker.as_str())
        {
            tokio::time::sleep(*delay).await;
        }
    }

    fn next_handle(&self, to: ConversationId) -> MessageHandle {
        MessageHandle {
            conversation: to,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

#[async_trait]
impl RelayOutbound for RecordingOutbound {
    async fn send_text(&self, to: ConversationId, text: &str) -> Result<MessageHandle> {
        let handle = self.next_handle(to);
        self.last_text
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, text.to_string());
        self.push(Recorded::Text {
            handle,
            text: text.to_string(),
        });
        self.hold_if_slow(text).await;
        Ok(handle)
    }

    async fn edit_status(
        &self,
        handle: MessageHandle,
        text: &str,
        controls: StatusControls,
    ) -> Result<()> {
        if self.fail_edits {
            return Err(Error::external(
                "edit rejected",
                std::io::Error::other("bad gateway"),
            ));
        }
        {
            let mut last = self.last_text.lock().unwrap_or_else(|e| e.into_inner());
            if last.get(&handle).is_some_and(|t| t == text) {
                return Err(Error::NotModified);
            }
            last.insert(handle, text.to_string());
        }
        self.push(Recorded::Edit {
            handle,
            text: text.to_string(),
            controls,
        });
        self.hold_if_slow(text).await;
        Ok(())
    }

    async fn send_file(&self, to: ConversationId, upload: FileUpload<'_>) -> Result<MessageHandle> {
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload_at == Some(index) {
            return Err(Error::external(
                "upload rejected",
                std::io::Error::other("request entity too large"),
            ));
        }
        let bytes = tokio::fs::read(upload.path).await?;
        self.push(Recorded::File {
            to,
            file_name: upload.file_name.to_string(),
            kind: upload.kind,
            caption: upload.caption.map(str::to_string),
            bytes,
        });
        Ok(self.next_handle(to))
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<()> {
        self.push(Recorded::Delete { handle });
        Ok(())
    }
}
