//! Recoverable per-image failures.
//!
//! Any of these skips the current image with a warning; the batch
//! keeps going. Startup failures use `anyhow` and are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkipImage {
    #[error("image has zero dimensions")]
    EmptyImage,

    #[error("metadata required but missing or unreadable")]
    MetadataUnreadable,

    #[error("search radius below one pixel: {0}")]
    SearchRadiusTooSmall(f32),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("interactive training is not available on this run")]
    InteractiveUnavailable,

    #[error("classification failed: {0}")]
    Classify(String),
}
