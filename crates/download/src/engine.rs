use std::{path::Path, sync::Arc, time::Duration};

use {
    futures::StreamExt,
    tokio::{
        fs::{File, OpenOptions},
        io::AsyncWriteExt,
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    fetch::Fetcher,
    filename,
    progress::{ProgressSink, ProgressSnapshot, Throttle},
};

/// Cooperative stop signals for one engine invocation.
///
/// Tokens cannot be reset, so the scheduler hands every invocation a fresh
/// pair; a clone observes the same tokens.
#[derive(Debug, Clone)]
pub struct TransferSignals {
    cancel: CancellationToken,
    pause: CancellationToken,
}

impl TransferSignals {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: CancellationToken::new(),
        }
    }

    /// Stop and discard partial data.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop and keep partial data for a later resume.
    pub fn pause(&self) {
        self.pause.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_cancelled()
    }
}

impl Default for TransferSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// How one engine invocation ended.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The whole resource is on disk.
    Completed {
        bytes: u64,
        /// Name suggested by `Content-Disposition`, if any.
        remote_name: Option<String>,
    },
    /// Stopped on request; the partial file is kept.
    Paused(ProgressSnapshot),
    /// Stopped on request; the caller removes the partial file.
    Cancelled,
    /// Network, status or I/O failure. Whatever reached disk stays there.
    Failed(Error),
}

impl DownloadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Paused(_) => "paused",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Streams one URL into one file.
///
/// Each call is a single attempt. Resume state is the file itself: the next
/// call after a pause or failure asks the server for `bytes=<file size>-`.
pub struct DownloadEngine {
    fetcher: Arc<dyn Fetcher>,
    progress_interval: Duration,
}

impl DownloadEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>, progress_interval: Duration) -> Self {
        Self {
            fetcher,
            progress_interval,
        }
    }

    pub async fn download(
        &self,
        url: &str,
        target: &Path,
        signals: &TransferSignals,
        sink: &dyn ProgressSink,
    ) -> DownloadOutcome {
        match self.run(url, target, signals, sink).await {
            Ok(outcome) => {
                debug!(url, path = %target.display(), outcome = outcome.label(), "download finished");
                outcome
            },
            Err(e) => {
                warn!(url, path = %target.display(), error = %e, "download failed");
                DownloadOutcome::Failed(e)
            },
        }
    }

    async fn run(
        &self,
        url: &str,
        target: &Path,
        signals: &TransferSignals,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadOutcome> {
        if signals.is_cancelled() {
            return Ok(DownloadOutcome::Cancelled);
        }

        let offset = resume_offset(target).await?;
        let response = self
            .fetcher
            .get(url, (offset > 0).then_some(offset))
            .await?;

        if response.status == 416 && offset > 0 {
            info!(url, offset, "range not satisfiable, file already complete");
            return Ok(DownloadOutcome::Completed {
                bytes: offset,
                remote_name: None,
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(Error::Status {
                status: response.status,
            });
        }

        let resuming = offset > 0 && response.status == 206;
        if offset > 0 && !resuming {
            warn!(
                url,
                offset,
                status = response.status,
                "server ignored the range request, restarting from zero"
            );
        }
        let start = if resuming { offset } else { 0 };
        let total = response.content_length.map(|len| len + start);
        let remote_name = response
            .content_disposition
            .as_deref()
            .and_then(filename::from_content_disposition);

        let mut file = open_target(target, resuming).await?;
        info!(url, path = %target.display(), start, ?total, "download started");

        let started = Instant::now();
        let mut throttle = Throttle::new(self.progress_interval, started);
        let snapshot = |downloaded: u64| ProgressSnapshot {
            downloaded,
            total,
            elapsed: started.elapsed(),
            session_bytes: downloaded - start,
        };

        let mut downloaded = start;
        let mut body = response.body;
        loop {
            // `None` means a signal fired while waiting for data.
            let next = tokio::select! {
                biased;
                () = signals.cancel.cancelled() => None,
                () = signals.pause.cancelled() => None,
                next = body.next() => Some(next),
            };

            if signals.is_cancelled() {
                file.flush().await.map_err(|e| Error::io(target, e))?;
                info!(url, downloaded, "download cancelled");
                return Ok(DownloadOutcome::Cancelled);
            }
            if signals.is_paused() {
                file.flush().await.map_err(|e| Error::io(target, e))?;
                info!(url, downloaded, "download paused");
                return Ok(DownloadOutcome::Paused(snapshot(downloaded)));
            }

            let chunk = match next {
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(e))) => {
                    // Keep what arrived so the next attempt resumes from it.
                    file.flush().await.map_err(|e| Error::io(target, e))?;
                    return Err(e);
                },
                Some(None) | None => break,
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(target, e))?;
            downloaded += chunk.len() as u64;

            if throttle.ready(Instant::now()) {
                sink.report(snapshot(downloaded)).await;
            }
        }

        file.flush().await.map_err(|e| Error::io(target, e))?;
        file.sync_all().await.map_err(|e| Error::io(target, e))?;
        drop(file);

        if downloaded == 0 {
            return Err(Error::EmptyBody);
        }
        if let Some(expected) = total
            && downloaded < expected
        {
            return Err(Error::Truncated {
                received: downloaded,
                expected,
            });
        }

        info!(url, bytes = downloaded, "download complete");
        Ok(DownloadOutcome::Completed {
            bytes: downloaded,
            remote_name,
        })
    }
}

/// Size of an existing partial file, or 0.
async fn resume_offset(target: &Path) -> Result<u64> {
    match tokio::fs::metadata(target).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::io(target, e)),
    }
}

async fn open_target(target: &Path, append: bool) -> Result<File> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let file = if append {
        OpenOptions::new().append(true).open(target).await
    } else {
        File::create(target).await
    };
    file.map_err(|e| Error::io(target, e))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{progress::NoProgress, scripted::ScriptedFetcher},
        async_trait::async_trait,
        std::sync::Mutex,
    };

    const KIB: usize = 1024;

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn engine(fetcher: &Arc<ScriptedFetcher>, interval: Duration) -> DownloadEngine {
        DownloadEngine::new(Arc::clone(fetcher) as Arc<dyn Fetcher>, interval)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressSnapshot>>);

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn report(&self, snapshot: ProgressSnapshot) {
            self.0.lock().unwrap().push(snapshot);
        }
    }

    impl Recorder {
        fn snapshots(&self) -> Vec<ProgressSnapshot> {
            self.0.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn downloads_whole_body() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(10 * KIB);
        let fetcher = Arc::new(ScriptedFetcher::new(data.clone()).chunk_size(KIB));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("https://x/out.bin", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Completed { bytes, .. } if bytes == 10 * KIB as u64));
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert_eq!(fetcher.requests(), vec![("https://x/out.bin".into(), None)]);
    }

    #[tokio::test]
    async fn resumes_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(8 * KIB);
        std::fs::write(&target, &data[..3000]).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(data.clone()).chunk_size(KIB));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Completed { .. }));
        assert_eq!(fetcher.requests()[0].1, Some(3000));
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn range_not_satisfiable_means_already_complete() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(4 * KIB);
        std::fs::write(&target, &data).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(data.clone()));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Completed { bytes, .. } if bytes == 4 * KIB as u64));
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn ignored_range_restarts_without_duplicating_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(6 * KIB);
        std::fs::write(&target, &data[..2048]).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(data.clone()).ignore_range());

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Completed { .. }));
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn error_status_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let fetcher = Arc::new(ScriptedFetcher::new(body(KIB)).status(503));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(
            outcome,
            DownloadOutcome::Failed(Error::Status { status: 503 })
        ));
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_body_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Failed(Error::EmptyBody)));
    }

    #[tokio::test]
    async fn unknown_length_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(5 * KIB);
        let fetcher = Arc::new(
            ScriptedFetcher::new(data.clone())
                .chunk_size(KIB)
                .without_content_length()
                .chunk_delay(Duration::from_millis(5)),
        );
        let recorder = Recorder::default();

        let outcome = engine(&fetcher, Duration::from_millis(1))
            .download("u", &target, &TransferSignals::new(), &recorder)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Completed { .. }));
        let snaps = recorder.snapshots();
        assert!(!snaps.is_empty());
        assert!(snaps.iter().all(|s| s.total.is_none() && s.percent().is_none()));
    }

    #[tokio::test]
    async fn cancel_stops_writing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let signals = TransferSignals::new();
        let trigger = signals.clone();
        let fetcher = Arc::new(
            ScriptedFetcher::new(body(32 * KIB))
                .chunk_size(KIB)
                .on_chunk(move |pos| {
                    if pos >= 10 * KIB as u64 {
                        trigger.cancel();
                    }
                }),
        );

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &target, &signals, &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Cancelled));
        assert_eq!(std::fs::metadata(&target).unwrap().len(), 10 * KIB as u64);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let signals = TransferSignals::new();
        signals.cancel();
        let fetcher = Arc::new(ScriptedFetcher::new(body(KIB)));

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &dir.path().join("x"), &signals, &NoProgress)
            .await;

        assert!(matches!(outcome, DownloadOutcome::Cancelled));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn repeated_pause_resume_yields_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(100 * KIB);
        let armed: Arc<Mutex<Option<(u64, TransferSignals)>>> = Arc::new(Mutex::new(None));
        let hook = Arc::clone(&armed);
        let fetcher = Arc::new(ScriptedFetcher::new(data.clone()).chunk_size(KIB).on_chunk(
            move |pos| {
                if let Some((at, signals)) = hook.lock().unwrap().as_ref()
                    && pos >= *at
                {
                    signals.pause();
                }
            },
        ));
        let engine = engine(&fetcher, Duration::from_secs(60));

        let stops = [20 * KIB as u64, 37 * KIB as u64, 80 * KIB as u64];
        for stop in stops {
            let signals = TransferSignals::new();
            *armed.lock().unwrap() = Some((stop, signals.clone()));
            let outcome = engine.download("u", &target, &signals, &NoProgress).await;
            let DownloadOutcome::Paused(snapshot) = outcome else {
                panic!("expected pause at {stop}, got {outcome:?}");
            };
            assert_eq!(snapshot.downloaded, stop);
            assert_eq!(snapshot.total, Some(data.len() as u64));
            assert_eq!(std::fs::metadata(&target).unwrap().len(), stop);
        }

        *armed.lock().unwrap() = None;
        let outcome = engine
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;
        assert!(matches!(outcome, DownloadOutcome::Completed { bytes, .. } if bytes == data.len() as u64));
        assert_eq!(std::fs::read(&target).unwrap(), data);

        let ranges: Vec<Option<u64>> = fetcher.requests().into_iter().map(|(_, r)| r).collect();
        assert_eq!(ranges, vec![None, Some(stops[0]), Some(stops[1]), Some(stops[2])]);
    }

    #[tokio::test]
    async fn failure_keeps_bytes_for_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let data = body(64 * KIB);
        let fetcher = Arc::new(
            ScriptedFetcher::new(data.clone())
                .chunk_size(KIB)
                .fail_once_at(50 * KIB as u64),
        );
        let engine = engine(&fetcher, Duration::from_secs(60));

        let first = engine
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;
        assert!(matches!(first, DownloadOutcome::Failed(_)));
        assert_eq!(std::fs::metadata(&target).unwrap().len(), 50 * KIB as u64);

        let second = engine
            .download("u", &target, &TransferSignals::new(), &NoProgress)
            .await;
        assert!(matches!(second, DownloadOutcome::Completed { .. }));
        assert_eq!(fetcher.requests()[1].1, Some(50 * KIB as u64));
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }

    #[tokio::test]
    async fn progress_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let interval = Duration::from_millis(25);
        let fetcher = Arc::new(
            ScriptedFetcher::new(body(60 * KIB))
                .chunk_size(KIB)
                .chunk_delay(Duration::from_millis(2)),
        );
        let recorder = Recorder::default();

        let outcome = engine(&fetcher, interval)
            .download("u", &target, &TransferSignals::new(), &recorder)
            .await;
        assert!(matches!(outcome, DownloadOutcome::Completed { .. }));

        let snaps = recorder.snapshots();
        assert!(!snaps.is_empty());
        assert!(snaps.len() < 60, "one report per chunk is not throttling");
        assert!(snaps[0].elapsed >= interval);
        for pair in snaps.windows(2) {
            assert!(pair[1].elapsed - pair[0].elapsed >= interval);
        }
    }

    #[tokio::test]
    async fn content_disposition_name_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            ScriptedFetcher::new(body(KIB))
                .content_disposition("attachment; filename=\"Holiday Clip.mp4\""),
        );

        let outcome = engine(&fetcher, Duration::from_secs(60))
            .download("u", &dir.path().join("x"), &TransferSignals::new(), &NoProgress)
            .await;

        let DownloadOutcome::Completed { remote_name, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(remote_name.as_deref(), Some("Holiday_Clip.mp4"));
    }
}
