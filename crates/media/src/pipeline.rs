use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    relay_channels::{FileUpload, RelayOutbound},
    relay_common::{ConversationId, UploadKind},
    tempfile::TempDir,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    kind::upload_kind,
    segment::Segmenter,
    split::{PartRange, plan_parts, write_part},
};

/// How a file reached the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Single,
    ByteParts,
    Segments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub method: DeliveryMethod,
    pub parts: usize,
    pub bytes: u64,
}

/// Told before each upload starts, so the caller can update its status line.
#[async_trait]
pub trait UploadProgress: Send + Sync {
    async fn uploading(&self, part: usize, total: usize);
}

pub struct NoUploadProgress;

#[async_trait]
impl UploadProgress for NoUploadProgress {
    async fn uploading(&self, _part: usize, _total: usize) {}
}

/// Delivers a finished download through the transport.
///
/// Files up to the chunk cap go out as one upload. Larger files are cut into
/// parts that are written one at a time into a scratch directory, uploaded in
/// order and deleted as soon as each upload is confirmed. The source file and
/// the scratch directory are removed whatever the outcome.
pub struct ChunkPipeline {
    outbound: Arc<dyn RelayOutbound>,
    chunk_cap: u64,
    work_dir: PathBuf,
    segmenter: Option<Segmenter>,
}

impl ChunkPipeline {
    pub fn new(outbound: Arc<dyn RelayOutbound>, chunk_cap: u64, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbound,
            chunk_cap,
            work_dir: work_dir.into(),
            segmenter: None,
        }
    }

    /// Try time-based segmentation for oversized videos before byte splitting.
    #[must_use]
    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Upload `source` to `to` under `display_name`, then remove it.
    pub async fn deliver(
        &self,
        to: ConversationId,
        source: &Path,
        display_name: &str,
        progress: &dyn UploadProgress,
    ) -> Result<Delivery> {
        let result = self.deliver_inner(to, source, display_name, progress).await;
        remove_quietly(source).await;
        match &result {
            Ok(delivery) => info!(
                conversation = %to,
                file = display_name,
                method = ?delivery.method,
                parts = delivery.parts,
                bytes = delivery.bytes,
                "delivered"
            ),
            Err(e) => warn!(conversation = %to, file = display_name, error = %e, "delivery failed"),
        }
        result
    }

    async fn deliver_inner(
        &self,
        to: ConversationId,
        source: &Path,
        display_name: &str,
        progress: &dyn UploadProgress,
    ) -> Result<Delivery> {
        let size = match tokio::fs::metadata(source).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::invalid_input(format!(
                    "{} does not exist",
                    source.display()
                )));
            },
            Err(e) => return Err(Error::io(source, e)),
        };
        if size == 0 {
            return Err(Error::invalid_input(format!("{} is empty", source.display())));
        }

        let kind = upload_kind(display_name);
        if size <= self.chunk_cap {
            progress.uploading(1, 1).await;
            self.upload(to, source, display_name, kind, None).await?;
            return Ok(Delivery {
                method: DeliveryMethod::Single,
                parts: 1,
                bytes: size,
            });
        }

        let scratch = tempfile::Builder::new()
            .prefix(".parts-")
            .tempdir_in(&self.work_dir)
            .map_err(|e| Error::io(&self.work_dir, e))?;

        if kind == UploadKind::Video
            && let Some(segmenter) = &self.segmenter
            && let Some(segments) = self.usable_segments(segmenter, source, &scratch).await
        {
            return self
                .upload_segments(to, &segments, display_name, size, progress)
                .await;
        }

        self.upload_byte_parts(to, source, display_name, size, &scratch, progress)
            .await
    }

    /// Segments, or `None` when the byte split should be used instead.
    async fn usable_segments(
        &self,
        segmenter: &Segmenter,
        source: &Path,
        scratch: &TempDir,
    ) -> Option<Vec<PathBuf>> {
        let out_dir = scratch.path().join("segments");
        if let Err(e) = tokio::fs::create_dir(&out_dir).await {
            warn!(error = %e, "cannot create segment directory, using byte split");
            return None;
        }

        let segments = match segmenter.segment(source, &out_dir).await {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "segmentation failed, using byte split");
                remove_dir_quietly(&out_dir).await;
                return None;
            },
        };

        for segment in &segments {
            let len = tokio::fs::metadata(segment).await.map(|m| m.len()).unwrap_or(0);
            if len == 0 || len > self.chunk_cap {
                warn!(
                    segment = %segment.display(),
                    len,
                    cap = self.chunk_cap,
                    "segment outside size limits, using byte split"
                );
                remove_dir_quietly(&out_dir).await;
                return None;
            }
        }
        Some(segments)
    }

    async fn upload_segments(
        &self,
        to: ConversationId,
        segments: &[PathBuf],
        display_name: &str,
        size: u64,
        progress: &dyn UploadProgress,
    ) -> Result<Delivery> {
        let total = segments.len();
        let (stem, ext) = split_extension(display_name);
        for (i, segment) in segments.iter().enumerate() {
            let index = i + 1;
            let name = format!("{stem}_part{index:03}{ext}");
            let caption = format!("{display_name} ({index}/{total})");
            progress.uploading(index, total).await;
            self.upload(to, segment, &name, UploadKind::Video, Some(&caption))
                .await?;
            remove_quietly(segment).await;
        }
        Ok(Delivery {
            method: DeliveryMethod::Segments,
            parts: total,
            bytes: size,
        })
    }

    async fn upload_byte_parts(
        &self,
        to: ConversationId,
        source: &Path,
        display_name: &str,
        size: u64,
        scratch: &TempDir,
        progress: &dyn UploadProgress,
    ) -> Result<Delivery> {
        let parts = plan_parts(size, self.chunk_cap)?;
        debug!(file = display_name, size, parts = parts.len(), "splitting");
        for part in &parts {
            self.upload_part(to, source, display_name, part, scratch, progress)
                .await?;
        }
        Ok(Delivery {
            method: DeliveryMethod::ByteParts,
            parts: parts.len(),
            bytes: size,
        })
    }

    async fn upload_part(
        &self,
        to: ConversationId,
        source: &Path,
        display_name: &str,
        part: &PartRange,
        scratch: &TempDir,
        progress: &dyn UploadProgress,
    ) -> Result<()> {
        let name = part.file_name(display_name);
        let path = scratch.path().join(&name);
        write_part(source, part, &path).await?;

        let caption = format!("{display_name} {}", part.tag());
        progress.uploading(part.index, part.total).await;
        let result = self
            .upload(to, &path, &name, UploadKind::Document, Some(&caption))
            .await;
        remove_quietly(&path).await;
        result
    }

    async fn upload(
        &self,
        to: ConversationId,
        path: &Path,
        file_name: &str,
        kind: UploadKind,
        caption: Option<&str>,
    ) -> Result<()> {
        self.outbound
            .send_file(to, FileUpload {
                path,
                file_name,
                kind,
                caption,
            })
            .await
            .map_err(|source| Error::Upload {
                file_name: file_name.to_string(),
                source,
            })?;
        debug!(conversation = %to, file_name, "uploaded");
        Ok(())
    }
}

/// `("movie", ".mp4")`; the extension part is empty when there is none.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove directory");
    }
}
