//! Shared ids, error plumbing, and small helpers used by every relay crate.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{ConversationId, RequestId, UploadKind, UserId, format_bytes},
};
