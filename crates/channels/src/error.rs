use std::error::Error as StdError;

/// Crate-wide result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transport errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An edit carried exactly the content already shown. Expected whenever
    /// two progress renders are identical; callers swallow it.
    #[error("message not modified")]
    NotModified,

    /// Input payload or parameter is invalid.
    #[error("invalid transport input: {message}")]
    InvalidInput { message: String },

    /// The platform rejected the request (including failed uploads).
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// `true` for the benign "content unchanged" edit rejection.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }
}
