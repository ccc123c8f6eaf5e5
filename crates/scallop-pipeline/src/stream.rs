//! Streaming entry points.
//!
//! One frame at a time on a single worker slot. Calls take `&mut self`
//! and never overlap; frame-rate concurrency belongs to the caller.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{info, warn};

use scallop_core::Detection;

use crate::driver::SystemConfig;
use crate::task::{FrameMetadata, ImageSource, ImageTask, ThreadStatistics, WorkerContext};
use crate::worker::{process_image, WorkerOutput};

pub struct StreamDetector {
    cfg: SystemConfig,
    ctx: WorkerContext,
    frame: u64,
    list: Option<BufWriter<File>>,
    output_dir: Option<PathBuf>,
}

impl StreamDetector {
    /// Load the classifier and color bank up front; any failure here is
    /// fatal, a detector never half-works.
    pub fn new(cfg: SystemConfig) -> Result<Self> {
        let bank = cfg.load_colorbank()?;
        let classifier = scallop_classify::load_classifier(&cfg.classifier)?;

        let list = if cfg.output.list_path.is_empty() {
            None
        } else {
            let file = File::create(&cfg.output.list_path)
                .with_context(|| format!("open output list: {}", cfg.output.list_path))?;
            Some(BufWriter::new(file))
        };
        let output_dir = cfg.output.dir.as_ref().map(PathBuf::from);

        info!("stream: detector ready (classifier {})", cfg.classifier.key);
        Ok(StreamDetector {
            ctx: WorkerContext::new(bank, classifier),
            cfg,
            frame: 0,
            list,
            output_dir,
        })
    }

    /// Detect in one frame. Skippable conditions log a warning and
    /// return no detections rather than failing the stream.
    pub fn process_frame(
        &mut self,
        image: &RgbImage,
        altitude_m: f32,
        pitch_deg: f32,
        roll_deg: f32,
    ) -> Result<Vec<Detection>> {
        let metadata = FrameMetadata {
            altitude_m,
            pitch_deg,
            roll_deg,
            focal_length_px: self.cfg.input.focal_length_px,
        };
        self.run(ImageSource::Memory(image.clone()), Some(metadata), false)
    }

    /// Stereo variant: both halves concatenated into one wide frame,
    /// detection restricted to the left camera.
    pub fn process_frame_pair(
        &mut self,
        left: &RgbImage,
        right: &RgbImage,
        altitude_m: f32,
        pitch_deg: f32,
        roll_deg: f32,
    ) -> Result<Vec<Detection>> {
        let h = left.height().max(right.height());
        let mut wide = RgbImage::new(left.width() + right.width(), h);
        image::imageops::replace(&mut wide, left, 0, 0);
        image::imageops::replace(&mut wide, right, left.width() as i64, 0);

        let metadata = FrameMetadata {
            altitude_m,
            pitch_deg,
            roll_deg,
            focal_length_px: self.cfg.input.focal_length_px,
        };
        self.run(ImageSource::Memory(wide), Some(metadata), true)
    }

    /// Detect in an image file, with pose metadata when the caller has
    /// it.
    pub fn process_file(
        &mut self,
        path: &Path,
        metadata: Option<FrameMetadata>,
    ) -> Result<Vec<Detection>> {
        self.run(ImageSource::Path(path.to_path_buf()), metadata, false)
    }

    pub fn stats(&self) -> &ThreadStatistics {
        &self.ctx.stats
    }

    fn run(
        &mut self,
        source: ImageSource,
        metadata: Option<FrameMetadata>,
        left_half_only: bool,
    ) -> Result<Vec<Detection>> {
        let frame = self.frame;
        self.frame += 1;
        let name = format!("streaming_frame_{frame}");

        let task = ImageTask {
            index: frame,
            name: name.clone(),
            classifier_key: self.cfg.classifier.key.clone(),
            source,
            metadata,
            metadata_required: self.cfg.input.metadata_required,
            bounds: self.cfg.bounds(),
            left_half_only,
            toggles: self.cfg.toggles(),
            training: None,
            output_dir: self.output_dir.clone(),
            min_class_score: self.cfg.runtime.min_class_score,
            salient_blobs: self.cfg.runtime.salient_blobs,
        };

        let detections = match process_image(&mut self.ctx, &task) {
            Ok(WorkerOutput::Detections(d)) => d,
            Ok(WorkerOutput::Samples(_)) => Vec::new(),
            Err(skip) => {
                warn!("skipping {name}: {skip}");
                self.ctx.stats.skipped += 1;
                Vec::new()
            }
        };

        if let Some(list) = self.list.as_mut() {
            for d in &detections {
                writeln!(
                    list,
                    "{} {} {:.2} {:.2} {:.2} {:.2} {:.2} {:.4}",
                    name,
                    d.category.as_str(),
                    d.row,
                    d.col,
                    d.angle,
                    d.major,
                    d.minor,
                    d.class_scores[d.category.index()]
                )
                .context("write output list")?;
            }
            list.flush().context("flush output list")?;
        }
        Ok(detections)
    }
}

impl Drop for StreamDetector {
    fn drop(&mut self) {
        if let Some(list) = self.list.as_mut() {
            let _ = list.flush();
        }
    }
}
