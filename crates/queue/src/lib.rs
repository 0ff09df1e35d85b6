//! Per-conversation download queue.
//!
//! [`QueueScheduler`] owns one FIFO queue per conversation and runs at most
//! one transfer per conversation at a time: download, then deliver, then the
//! next request. Status messages are rendered by [`progress`] and daily
//! limits are enforced through a [`QuotaStore`].

pub mod error;
pub mod progress;
pub mod quota;
pub mod request;
pub mod scheduler;

pub use {
    error::{Error, Result},
    progress::{RequestStatus, StatusReporter, render},
    quota::{JsonQuotaStore, QuotaStore, Unlimited},
    request::DownloadRequest,
    scheduler::{ConversationView, Enqueued, QueuePosition, QueueScheduler},
};
