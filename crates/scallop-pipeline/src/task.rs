//! Per-image work units and per-slot worker state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

use scallop_classify::Classifier;
use scallop_core::colorbank::ColorBank;

use crate::gt::GroundTruthList;
use crate::worker::Stage;

/// Search radius bounds in both unit systems. A set physical bound wins
/// whenever the image carries usable metadata.
#[derive(Debug, Clone, Copy)]
pub struct SearchBounds {
    pub min_radius_m: f32,
    pub max_radius_m: f32,
    pub min_radius_px: f32,
    pub max_radius_px: f32,
}

/// Camera pose for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub altitude_m: f32,
    pub pitch_deg: f32,
    pub roll_deg: f32,
    pub focal_length_px: f32,
}

/// Optional per-image artifacts and policy switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputToggles {
    pub proposal_images: bool,
    pub detection_images: bool,
    pub keep_border_points: bool,
}

/// Where training labels come from.
#[derive(Clone)]
pub enum TrainingSource {
    /// Labels supplied by a human in the loop. Batch runs cannot serve
    /// this and skip the image instead.
    Interactive,
    GroundTruth(Arc<GroundTruthList>),
}

/// The image payload: already-decoded frames for streaming, paths for
/// batch runs so decode cost lands on the worker thread.
#[derive(Clone)]
pub enum ImageSource {
    Memory(RgbImage),
    Path(PathBuf),
}

/// Everything one worker invocation needs, built once by the driver
/// and moved through a channel. Immutable after construction.
#[derive(Clone)]
pub struct ImageTask {
    /// Submission index; output list order follows it.
    pub index: u64,
    pub name: String,
    /// Which loaded classifier handles this image.
    pub classifier_key: String,
    pub source: ImageSource,
    pub metadata: Option<FrameMetadata>,
    pub metadata_required: bool,
    pub bounds: SearchBounds,
    /// Stereo frames carry the target in the left half only.
    pub left_half_only: bool,
    pub toggles: OutputToggles,
    pub training: Option<TrainingSource>,
    pub output_dir: Option<PathBuf>,
    /// Scores below this resolve to the background category.
    pub min_class_score: f32,
    /// Force saliency-map blob proposals regardless of the classifier.
    pub salient_blobs: bool,
}

/// Per-slot counters and stage timings. Merged into a run total after
/// the pool drains.
#[derive(Debug, Clone)]
pub struct ThreadStatistics {
    pub images: u64,
    pub skipped: u64,
    pub candidates: u64,
    pub detections: u64,
    pub samples: u64,
    pub surveyed_area_m2: f64,
    stage_nanos: [u64; Stage::COUNT],
}

impl Default for ThreadStatistics {
    fn default() -> Self {
        ThreadStatistics {
            images: 0,
            skipped: 0,
            candidates: 0,
            detections: 0,
            samples: 0,
            surveyed_area_m2: 0.0,
            stage_nanos: [0; Stage::COUNT],
        }
    }
}

impl ThreadStatistics {
    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        self.stage_nanos[stage.index()] += elapsed.as_nanos() as u64;
    }

    pub fn stage_total(&self, stage: Stage) -> Duration {
        Duration::from_nanos(self.stage_nanos[stage.index()])
    }

    pub fn merge(&mut self, other: &ThreadStatistics) {
        self.images += other.images;
        self.skipped += other.skipped;
        self.candidates += other.candidates;
        self.detections += other.detections;
        self.samples += other.samples;
        self.surveyed_area_m2 += other.surveyed_area_m2;
        for (a, b) in self.stage_nanos.iter_mut().zip(&other.stage_nanos) {
            *a += b;
        }
    }
}

/// One worker slot: a private color bank and statistics block plus the
/// shared classifier.
pub struct WorkerContext {
    pub bank: ColorBank,
    pub classifier: Arc<dyn Classifier>,
    pub stats: ThreadStatistics,
}

impl WorkerContext {
    pub fn new(bank: ColorBank, classifier: Arc<dyn Classifier>) -> Self {
        WorkerContext {
            bank,
            classifier,
            stats: ThreadStatistics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_merge_adds_everything() {
        let mut a = ThreadStatistics::default();
        a.images = 3;
        a.detections = 5;
        a.record_stage(Stage::Preparing, Duration::from_millis(10));

        let mut b = ThreadStatistics::default();
        b.images = 2;
        b.skipped = 1;
        b.record_stage(Stage::Preparing, Duration::from_millis(5));

        a.merge(&b);
        assert_eq!(a.images, 5);
        assert_eq!(a.skipped, 1);
        assert_eq!(a.detections, 5);
        assert_eq!(a.stage_total(Stage::Preparing), Duration::from_millis(15));
    }
}
