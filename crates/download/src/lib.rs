//! Resumable single-file HTTP download engine.
//!
//! One [`DownloadEngine::download`] call makes exactly one attempt: it resumes
//! from whatever is already on disk, streams the rest, polls the pause/cancel
//! tokens on every chunk and reports throttled [`ProgressSnapshot`]s.

pub mod engine;
pub mod error;
pub mod fetch;
pub mod filename;
pub mod progress;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use {
    engine::{DownloadEngine, DownloadOutcome, TransferSignals},
    error::{Error, Result},
    fetch::{FetchResponse, Fetcher, HttpFetcher},
    progress::{NoProgress, ProgressSink, ProgressSnapshot},
};
