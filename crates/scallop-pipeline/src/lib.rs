//! Batch and streaming detection pipeline.
//!
//! The driver feeds immutable per-image tasks to a fixed pool of worker
//! threads and re-orders their results so the output list always
//! follows submission order. The streaming entry points reuse the same
//! per-image worker on a single slot.

pub mod driver;
pub mod error;
pub mod gt;
pub mod stream;
pub mod task;
pub mod worker;

pub use driver::{run_batch, RunSummary, SystemConfig};
pub use error::SkipImage;
pub use stream::StreamDetector;
pub use task::FrameMetadata;
