//! Post-download delivery: upload-kind detection, byte-exact splitting,
//! optional ffmpeg segmentation and the [`ChunkPipeline`] that ties them
//! together.

pub mod error;
pub mod kind;
pub mod pipeline;
pub mod segment;
pub mod split;

pub use {
    error::{Error, Result},
    kind::upload_kind,
    pipeline::{ChunkPipeline, Delivery, DeliveryMethod, NoUploadProgress, UploadProgress},
    segment::Segmenter,
    split::{PartRange, plan_parts},
};
