//! Per-image processing.
//!
//! One call per image, driven through an explicit stage progression so
//! timings and failures attribute to a stage. Recoverable problems
//! return [`SkipImage`]; the driver logs and moves on.

use std::time::Instant;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;
use tracing::{debug, warn};

use scallop_classify::TrainingSample;
use scallop_core::consolidate::{
    consolidate, filter_candidates, remove_border_candidates,
};
use scallop_core::features::{extract_features, shape};
use scallop_core::gradients::{gradient_chain, GradientChain};
use scallop_core::imgprops::ImageProperties;
use scallop_core::postfilter::{remove_inside_points, resolve_categories, to_detections};
use scallop_core::prepare::{prepare, PreparedImage};
use scallop_core::proposals::{adaptive, blob, edges, template};
use scallop_core::{Candidate, Detection};

use crate::error::SkipImage;
use crate::task::{ImageSource, ImageTask, TrainingSource, WorkerContext};

/// Stage progression for one image. Training capture replaces the
/// feature/classify pair; everything else runs in listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initializing,
    Preparing,
    ProposingCandidates,
    Consolidating,
    TrainingCapture,
    ExtractingFeatures,
    Classifying,
    PostFiltering,
    Emitting,
    Done,
}

impl Stage {
    pub const COUNT: usize = 10;

    pub fn index(self) -> usize {
        match self {
            Stage::Initializing => 0,
            Stage::Preparing => 1,
            Stage::ProposingCandidates => 2,
            Stage::Consolidating => 3,
            Stage::TrainingCapture => 4,
            Stage::ExtractingFeatures => 5,
            Stage::Classifying => 6,
            Stage::PostFiltering => 7,
            Stage::Emitting => 8,
            Stage::Done => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Preparing => "preparing",
            Stage::ProposingCandidates => "proposing_candidates",
            Stage::Consolidating => "consolidating",
            Stage::TrainingCapture => "training_capture",
            Stage::ExtractingFeatures => "extracting_features",
            Stage::Classifying => "classifying",
            Stage::PostFiltering => "post_filtering",
            Stage::Emitting => "emitting",
            Stage::Done => "done",
        }
    }
}

/// What one image produced.
#[derive(Debug)]
pub enum WorkerOutput {
    Detections(Vec<Detection>),
    Samples(Vec<TrainingSample>),
}

struct StageClock {
    stage: Stage,
    started: Instant,
}

impl StageClock {
    fn new() -> Self {
        StageClock {
            stage: Stage::Initializing,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, ctx: &mut WorkerContext, next: Stage) {
        let elapsed = self.started.elapsed();
        ctx.stats.record_stage(self.stage, elapsed);
        debug!(stage = self.stage.as_str(), elapsed_us = elapsed.as_micros() as u64);
        self.stage = next;
        self.started = Instant::now();
    }
}

/// Run the whole per-image flow.
pub fn process_image(ctx: &mut WorkerContext, task: &ImageTask) -> Result<WorkerOutput, SkipImage> {
    let mut clock = StageClock::new();

    let input = load_input(task)?;
    if input.width() == 0 || input.height() == 0 {
        return Err(SkipImage::EmptyImage);
    }

    let props = match task.metadata {
        Some(m) => {
            match ImageProperties::with_metadata(
                input.width(),
                input.height(),
                m.altitude_m,
                m.pitch_deg,
                m.roll_deg,
                m.focal_length_px,
            ) {
                Some(p) => p,
                None if task.metadata_required => return Err(SkipImage::MetadataUnreadable),
                None => ImageProperties::without_metadata(input.width(), input.height()),
            }
        }
        None if task.metadata_required => return Err(SkipImage::MetadataUnreadable),
        None => ImageProperties::without_metadata(input.width(), input.height()),
    };

    let min_r = props.search_radius_px(task.bounds.min_radius_m, task.bounds.min_radius_px);
    let max_r = props.search_radius_px(task.bounds.max_radius_m, task.bounds.max_radius_px);
    if max_r < 1.0 {
        return Err(SkipImage::SearchRadiusTooSmall(max_r));
    }

    clock.advance(ctx, Stage::Preparing);
    let prep = prepare(&input, &ctx.bank, min_r, max_r, task.left_half_only);
    let chain = gradient_chain(&prep.gray8, prep.min_radius_px);

    clock.advance(ctx, Stage::ProposingCandidates);
    let sets = propose(ctx, &prep, &chain, task.salient_blobs);

    clock.advance(ctx, Stage::Consolidating);
    let (mut merged, _ranking) = consolidate(sets);
    if !task.toggles.keep_border_points {
        remove_border_candidates(&mut merged, prep.width, prep.height);
    }
    ctx.stats.candidates += merged.len() as u64;
    if task.toggles.proposal_images {
        dump_overlay(task, &prep, &merged, "candidates");
    }

    if let Some(training) = &task.training {
        clock.advance(ctx, Stage::TrainingCapture);
        let gt = match training {
            TrainingSource::Interactive => return Err(SkipImage::InteractiveUnavailable),
            TrainingSource::GroundTruth(list) => {
                list.to_candidates(&task.name, prep.resize_factor)
            }
        };
        extract_features(&prep, &chain, &props, &mut merged);
        let samples = ctx
            .classifier
            .extract_samples(&prep, &merged, &gt)
            .map_err(|e| SkipImage::Classify(e.to_string()))?;
        ctx.stats.samples += samples.len() as u64;
        finish(ctx, &mut clock, &props);
        return Ok(WorkerOutput::Samples(samples));
    }

    clock.advance(ctx, Stage::ExtractingFeatures);
    if ctx.classifier.requires_features() {
        extract_features(&prep, &chain, &props, &mut merged);
    }

    clock.advance(ctx, Stage::Classifying);
    let positive_indices = ctx
        .classifier
        .classify(&prep, &mut merged)
        .map_err(|e| SkipImage::Classify(e.to_string()))?;
    let mut positives: Vec<Candidate> = positive_indices
        .into_iter()
        .map(|i| merged[i].clone())
        .collect();

    clock.advance(ctx, Stage::PostFiltering);
    // The dense boundary pass refines geometry on positives only.
    shape::expensive_edge_search(&chain, &mut positives);
    filter_candidates(&mut positives, prep.min_radius_px, prep.max_radius_px);
    remove_inside_points(&mut positives);
    resolve_categories(&mut positives, task.min_class_score);

    clock.advance(ctx, Stage::Emitting);
    let detections = to_detections(&positives, prep.resize_factor);
    ctx.stats.detections += detections.len() as u64;
    if task.toggles.detection_images {
        dump_overlay(task, &prep, &positives, "detections");
    }

    finish(ctx, &mut clock, &props);
    Ok(WorkerOutput::Detections(detections))
}

fn finish(ctx: &mut WorkerContext, clock: &mut StageClock, props: &ImageProperties) {
    clock.advance(ctx, Stage::Done);
    ctx.stats.images += 1;
    if props.has_metadata() {
        ctx.stats.surveyed_area_m2 += props.area_m2() as f64;
    }
}

fn load_input(task: &ImageTask) -> Result<RgbImage, SkipImage> {
    match &task.source {
        ImageSource::Memory(img) => Ok(img.clone()),
        ImageSource::Path(path) => image::open(path)
            .map(|i| i.to_rgb8())
            .map_err(|e| SkipImage::Decode(e.to_string())),
    }
}

/// Run the proposal generators and clamp each output to the radius
/// bounds. Blob proposals come from the color bank's target response
/// when the classifier looks for targets at all, and from raw saliency
/// otherwise; `salient_only` forces the saliency pass.
fn propose(
    ctx: &WorkerContext,
    prep: &PreparedImage,
    chain: &GradientChain,
    salient_only: bool,
) -> Vec<Vec<Candidate>> {
    let blob_set = if ctx.classifier.detects_target() && !salient_only {
        blob::colored_blobs(&prep.color, prep.min_radius_px, prep.max_radius_px)
    } else {
        blob::salient_blobs(&prep.color, prep.min_radius_px, prep.max_radius_px)
    };
    let mut sets = vec![
        blob_set,
        adaptive::adaptive_candidates(&prep.gray8, prep.min_radius_px, prep.max_radius_px),
        template::template_candidates(chain, prep.min_radius_px, prep.max_radius_px, None),
        edges::stable_edge_candidates(chain, prep.min_radius_px, prep.max_radius_px),
    ];
    for set in &mut sets {
        filter_candidates(set, prep.min_radius_px, prep.max_radius_px);
    }
    sets
}

/// Write a circle overlay next to the output list. Failures are logged
/// and ignored; artifacts never fail a run.
fn dump_overlay(task: &ImageTask, prep: &PreparedImage, candidates: &[Candidate], suffix: &str) {
    let Some(dir) = &task.output_dir else {
        return;
    };
    let mut canvas = prep.rgb8.clone();
    for c in candidates {
        draw_hollow_circle_mut(
            &mut canvas,
            (c.col.round() as i32, c.row.round() as i32),
            c.radius().round() as i32,
            Rgb([255, 40, 40]),
        );
    }
    let stem = task.name.replace(['/', '\\'], "_");
    let path = dir.join(format!("{stem}_{suffix}.png"));
    if let Err(e) = canvas.save(&path) {
        warn!("failed to write overlay {}: {e}", path.display());
    }
}
