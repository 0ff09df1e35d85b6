use std::path::Path;

use {
    async_trait::async_trait,
    relay_common::{ConversationId, UploadKind},
};

use crate::{action::StatusControls, error::Result};

/// Address of a sent message that can later be edited or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub conversation: ConversationId,
    pub message_id: i32,
}

/// One outbound file upload. The transport streams `path` from disk.
#[derive(Debug, Clone, Copy)]
pub struct FileUpload<'a> {
    pub path: &'a Path,
    /// Name shown to the recipient.
    pub file_name: &'a str,
    pub kind: UploadKind,
    pub caption: Option<&'a str>,
}

/// Outbound side of the messaging transport.
///
/// Implementations must return only after the platform has confirmed the
/// operation: callers rely on a returned `send_file` meaning the upload is
/// durable, and order multi-part uploads on that.
#[async_trait]
pub trait RelayOutbound: Send + Sync {
    /// Send a plain text message and return a handle for later edits.
    async fn send_text(&self, to: ConversationId, text: &str) -> Result<MessageHandle>;

    /// Replace the text and inline controls of an existing message.
    ///
    /// Returns [`crate::Error::NotModified`] when nothing changed.
    async fn edit_status(
        &self,
        handle: MessageHandle,
        text: &str,
        controls: StatusControls,
    ) -> Result<()>;

    /// Upload a file from disk.
    async fn send_file(&self, to: ConversationId, upload: FileUpload<'_>) -> Result<MessageHandle>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<()>;
}
