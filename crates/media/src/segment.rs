//! Time-based video segmentation through an external ffmpeg.
//!
//! Keyframes are forced on every segment boundary so each part plays on its
//! own. This is best effort: callers fall back to a byte split on any error.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

const STDERR_TAIL: usize = 400;

#[derive(Debug, Clone)]
pub struct Segmenter {
    program: PathBuf,
    segment_seconds: u64,
    timeout: Duration,
}

impl Segmenter {
    pub fn new(program: impl Into<PathBuf>, segment_seconds: u64, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            segment_seconds: segment_seconds.max(1),
            timeout,
        }
    }

    /// Cut `input` into numbered segments inside `out_dir`, sorted by index.
    ///
    /// Fails when the tool cannot start, exits non-zero, runs past the
    /// timeout (the child is killed) or produces nothing.
    pub async fn segment(&self, input: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let pattern = out_dir.join(format!("segment_%03d.{ext}"));
        let seconds = self.segment_seconds;

        debug!(
            program = %self.program.display(),
            input = %input.display(),
            seconds,
            timeout_secs = self.timeout.as_secs(),
            "segmenting"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(input)
            .args(["-map", "0", "-c:v", "libx264", "-c:a", "aac"])
            .arg("-force_key_frames")
            .arg(format!("expr:gte(t,n_forced*{seconds})"))
            .args(["-f", "segment", "-reset_timestamps", "1", "-segment_time"])
            .arg(seconds.to_string())
            .arg(&pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::segmentation(format!("cannot start {}: {e}", self.program.display())))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::segmentation(format!("wait failed: {e}"))),
            Err(_) => {
                warn!(input = %input.display(), "segmentation timed out");
                return Err(Error::segmentation(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(Error::segmentation(format!(
                "exited with {}: {}",
                output.status,
                tail.trim()
            )));
        }

        let segments = list_segments(out_dir).await?;
        if segments.is_empty() {
            return Err(Error::segmentation("no segments produced"));
        }
        debug!(count = segments.len(), "segmentation done");
        Ok(segments)
    }
}

async fn list_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(dir, e))?;
    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(dir, e))? {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("segment_"))
        {
            segments.push(path);
        }
    }
    segments.sort();
    Ok(segments)
}
