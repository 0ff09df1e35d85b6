use std::path::{Path, PathBuf};

use {
    relay_common::{ConversationId, RequestId, UserId},
    relay_download::filename,
};

/// One URL submitted to a conversation's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub id: RequestId,
    pub conversation: ConversationId,
    pub user: UserId,
    pub url: String,
    /// Name shown in status messages and used for the upload, unless the
    /// server suggests a better one.
    pub display_name: String,
    /// Working file. Stable for the lifetime of the request so a paused
    /// transfer resumes from it.
    pub target: PathBuf,
}

impl DownloadRequest {
    pub fn new(conversation: ConversationId, user: UserId, url: &str, work_dir: &Path) -> Self {
        let id = RequestId::new();
        Self {
            id,
            conversation,
            user,
            url: url.to_string(),
            display_name: filename::name_from_url(url),
            target: work_dir.join(filename::working_file_name(url, &id.to_string())),
        }
    }
}
