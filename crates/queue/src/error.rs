use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("daily limit of {limit} downloads reached")]
    QuotaExceeded { limit: u32 },

    #[error("quota store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("quota store is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Channel(#[from] relay_channels::Error),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}

impl relay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

relay_common::impl_context!();
