//! Batch run configuration and the worker-pool driver.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use scallop_classify::{load_classifier, Classifier, ClassifierConfig, TrainingSample};
use scallop_core::colorbank::ColorBank;
use scallop_core::Detection;

use crate::gt::GroundTruthList;
use crate::task::{
    FrameMetadata, ImageSource, ImageTask, OutputToggles, SearchBounds, ThreadStatistics,
    TrainingSource, WorkerContext,
};
use crate::worker::{process_image, WorkerOutput};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Directory to scan recursively for images.
    #[serde(default)]
    pub dir: Option<String>,
    /// List file naming images one per line; overrides `dir`.
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub metadata_required: bool,
    #[serde(default = "default_focal_length")]
    pub focal_length_px: f32,
    /// Stereo pairs stored side by side; process the left half only.
    #[serde(default)]
    pub left_half_only: bool,
}

fn default_focal_length() -> f32 {
    1024.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub list_path: String,
    /// Where overlay images land; defaults beside the list.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub proposal_images: bool,
    #[serde(default)]
    pub detection_images: bool,
    #[serde(default)]
    pub keep_border_points: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Physical bounds, used when metadata is available.
    #[serde(default)]
    pub min_radius_m: f32,
    #[serde(default)]
    pub max_radius_m: f32,
    /// Pixel bounds, used otherwise.
    pub min_radius_px: f32,
    pub max_radius_px: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorbankConfig {
    /// Directory of `.cfilt` files; the built-in bank applies when
    /// absent.
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ground-truth annotation list; interactive capture when absent.
    #[serde(default)]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub sample_list: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Class scores below this resolve to the background category.
    #[serde(default = "default_min_class_score")]
    pub min_class_score: f32,
    /// Propose blobs from the raw saliency map even when the classifier
    /// is color-directed.
    #[serde(default)]
    pub salient_blobs: bool,
}

fn default_threads() -> usize {
    4
}

fn default_min_class_score() -> f32 {
    0.5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            threads: default_threads(),
            min_class_score: default_min_class_score(),
            salient_blobs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub search: SearchConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub colorbank: ColorbankConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl SystemConfig {
    pub fn load(path: &str) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read config: {path}"))?;
        let cfg: SystemConfig =
            toml::from_str(&text).with_context(|| format!("parse config: {path}"))?;
        Ok(cfg)
    }

    pub fn bounds(&self) -> SearchBounds {
        SearchBounds {
            min_radius_m: self.search.min_radius_m,
            max_radius_m: self.search.max_radius_m,
            min_radius_px: self.search.min_radius_px,
            max_radius_px: self.search.max_radius_px,
        }
    }

    pub fn toggles(&self) -> OutputToggles {
        OutputToggles {
            proposal_images: self.output.proposal_images,
            detection_images: self.output.detection_images,
            keep_border_points: self.output.keep_border_points,
        }
    }

    pub fn load_colorbank(&self) -> Result<ColorBank> {
        match &self.colorbank.dir {
            Some(dir) => ColorBank::load(Path::new(dir)),
            None => Ok(ColorBank::builtin()),
        }
    }
}

/// One image to process, as resolved from the input configuration.
#[derive(Debug, Clone)]
pub struct InputRecord {
    pub path: PathBuf,
    pub name: String,
    pub metadata: Option<FrameMetadata>,
    pub classifier_key: String,
}

/// Expand the input section into concrete records. List files win over
/// directory scans.
pub fn resolve_inputs(cfg: &SystemConfig) -> Result<Vec<InputRecord>> {
    if let Some(list) = &cfg.input.list {
        return parse_input_list(list, cfg);
    }
    let dir = cfg
        .input
        .dir
        .as_ref()
        .context("input needs either a dir or a list")?;
    let mut records = Vec::new();
    scan_dir(Path::new(dir), &mut records, &cfg.classifier.key)?;
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

fn scan_dir(dir: &Path, records: &mut Vec<InputRecord>, key: &str) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("scan input dir: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_dir(&path, records, key)?;
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if !ext.is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str())) {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        records.push(InputRecord {
            path,
            name,
            metadata: None,
            classifier_key: key.to_string(),
        });
    }
    Ok(())
}

/// `name key` or `name altitude pitch roll key`, one image per line.
fn parse_input_list(list_path: &str, cfg: &SystemConfig) -> Result<Vec<InputRecord>> {
    let text = std::fs::read_to_string(list_path)
        .with_context(|| format!("read input list: {list_path}"))?;
    let base = Path::new(list_path).parent().unwrap_or(Path::new("."));

    let mut records = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name, metadata, key) = match fields.as_slice() {
            [name, key] => (*name, None, *key),
            [name, alt, pitch, roll, key] => {
                let num = |s: &str, what: &str| -> Result<f32> {
                    s.parse::<f32>()
                        .with_context(|| format!("{list_path}:{}: bad {what}", lineno + 1))
                };
                let metadata = FrameMetadata {
                    altitude_m: num(alt, "altitude")?,
                    pitch_deg: num(pitch, "pitch")?,
                    roll_deg: num(roll, "roll")?,
                    focal_length_px: cfg.input.focal_length_px,
                };
                (*name, Some(metadata), *key)
            }
            other => bail!(
                "{list_path}:{}: expected 2 or 5 fields, got {}",
                lineno + 1,
                other.len()
            ),
        };
        records.push(InputRecord {
            path: base.join(name),
            name: name.to_string(),
            metadata,
            classifier_key: key.to_string(),
        });
    }
    Ok(records)
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub images: u64,
    pub skipped: u64,
    pub detections: u64,
    pub samples: u64,
    pub stats: ThreadStatistics,
}

enum ResultPayload {
    Output(WorkerOutput),
    Skipped,
}

/// Process every resolved input through the worker pool and write the
/// output list in submission order.
pub fn run_batch(cfg: &SystemConfig, cancel: Arc<AtomicBool>) -> Result<RunSummary> {
    let records = resolve_inputs(cfg)?;
    ensure!(!records.is_empty(), "input set is empty");

    let bank = cfg.load_colorbank()?;
    let classifiers = load_classifiers(cfg, &records)?;

    let list_file = File::create(&cfg.output.list_path)
        .with_context(|| format!("open output list: {}", cfg.output.list_path))?;
    let mut list = BufWriter::new(list_file);

    let mut sample_writer = match (&cfg.training.sample_list, cfg.training.enabled) {
        (Some(path), true) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("open sample list: {path}"))?,
        )),
        _ => None,
    };

    let training = training_source(cfg)?;
    let output_dir = cfg
        .output
        .dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| Path::new(&cfg.output.list_path).parent().map(PathBuf::from));

    let threads = cfg.runtime.threads.max(1);
    info!(
        "run: {} images, {} worker threads, classifier {}",
        records.len(),
        threads,
        cfg.classifier.key
    );

    let (task_tx, task_rx) = mpsc::channel::<ImageTask>();
    let task_rx = Arc::new(Mutex::new(task_rx));
    let (result_tx, result_rx) = mpsc::channel::<(u64, String, ResultPayload)>();
    let (stats_tx, stats_rx) = mpsc::channel::<ThreadStatistics>();

    let mut submitted = 0u64;
    let mut summary = RunSummary::default();

    std::thread::scope(|scope| -> Result<()> {
        for _ in 0..threads {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let stats_tx = stats_tx.clone();
            let bank = bank.clone();
            let classifiers = &classifiers;
            let cancel = Arc::clone(&cancel);
            scope.spawn(move || {
                // Every slot keeps its own bank and stats block; only
                // the classifier is shared.
                let mut contexts: HashMap<String, WorkerContext> = HashMap::new();
                loop {
                    let task = match task_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(task) = task else { break };
                    // Queued tasks are dropped once cancellation is
                    // requested; the image in flight always completes.
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let key = task.name.clone();
                    let ctx = contexts
                        .entry(task.classifier_key.clone())
                        .or_insert_with_key(|k| {
                            WorkerContext::new(bank.clone(), Arc::clone(&classifiers[k]))
                        });
                    let payload = match process_image(ctx, &task) {
                        Ok(out) => ResultPayload::Output(out),
                        Err(skip) => {
                            warn!("skipping {key}: {skip}");
                            ctx.stats.skipped += 1;
                            ResultPayload::Skipped
                        }
                    };
                    if result_tx.send((task.index, key, payload)).is_err() {
                        break;
                    }
                }
                let mut merged = ThreadStatistics::default();
                for ctx in contexts.values() {
                    merged.merge(&ctx.stats);
                }
                let _ = stats_tx.send(merged);
            });
        }
        drop(result_tx);
        drop(stats_tx);

        for record in &records {
            if cancel.load(Ordering::Relaxed) {
                info!("run: cancelled after {submitted} submissions");
                break;
            }
            let task = ImageTask {
                index: submitted,
                name: record.name.clone(),
                classifier_key: record.classifier_key.clone(),
                source: ImageSource::Path(record.path.clone()),
                metadata: record.metadata,
                metadata_required: cfg.input.metadata_required,
                bounds: cfg.bounds(),
                left_half_only: cfg.input.left_half_only,
                toggles: cfg.toggles(),
                training: training.clone(),
                output_dir: output_dir.clone(),
                min_class_score: cfg.runtime.min_class_score,
                salient_blobs: cfg.runtime.salient_blobs,
            };
            task_tx.send(task).context("worker pool hung up")?;
            submitted += 1;
        }
        drop(task_tx);

        // Re-order results so the list follows submission order.
        let mut pending: BTreeMap<u64, (String, ResultPayload)> = BTreeMap::new();
        let mut next = 0u64;
        for (index, name, payload) in result_rx {
            pending.insert(index, (name, payload));
            while let Some((name, payload)) = pending.remove(&next) {
                emit(&mut list, sample_writer.as_mut(), &name, payload, &mut summary)?;
                next += 1;
            }
        }
        while let Some((name, payload)) = pending.remove(&next) {
            emit(&mut list, sample_writer.as_mut(), &name, payload, &mut summary)?;
            next += 1;
        }

        for stats in stats_rx {
            summary.stats.merge(&stats);
        }
        Ok(())
    })?;

    list.flush().context("flush output list")?;
    if let Some(w) = sample_writer.as_mut() {
        w.flush().context("flush sample list")?;
    }

    summary.images = summary.stats.images;
    summary.skipped = summary.stats.skipped;
    info!(
        "run: {} images processed, {} skipped, {} detections, {} samples",
        summary.images, summary.skipped, summary.detections, summary.samples
    );
    Ok(summary)
}

fn training_source(cfg: &SystemConfig) -> Result<Option<TrainingSource>> {
    if !cfg.training.enabled {
        return Ok(None);
    }
    match &cfg.training.ground_truth {
        Some(path) => Ok(Some(TrainingSource::GroundTruth(Arc::new(
            GroundTruthList::load(path)?,
        )))),
        None => Ok(Some(TrainingSource::Interactive)),
    }
}

/// Load one classifier per distinct key referenced by the inputs. Every
/// key must match the configured classifier; an unknown key is fatal
/// before any image is touched.
fn load_classifiers(
    cfg: &SystemConfig,
    records: &[InputRecord],
) -> Result<HashMap<String, Arc<dyn Classifier>>> {
    let mut map: HashMap<String, Arc<dyn Classifier>> = HashMap::new();
    for record in records {
        if map.contains_key(&record.classifier_key) {
            continue;
        }
        ensure!(
            record.classifier_key == cfg.classifier.key,
            "input references unknown classifier key: {}",
            record.classifier_key
        );
        map.insert(record.classifier_key.clone(), load_classifier(&cfg.classifier)?);
    }
    Ok(map)
}

fn emit(
    list: &mut impl Write,
    sample_writer: Option<&mut BufWriter<File>>,
    name: &str,
    payload: ResultPayload,
    summary: &mut RunSummary,
) -> Result<()> {
    match payload {
        ResultPayload::Skipped => {}
        ResultPayload::Output(WorkerOutput::Detections(dets)) => {
            for d in &dets {
                write_detection_line(list, name, d)?;
            }
            summary.detections += dets.len() as u64;
        }
        ResultPayload::Output(WorkerOutput::Samples(samples)) => {
            if let Some(w) = sample_writer {
                for s in &samples {
                    write_sample_line(w, s)?;
                }
            }
            summary.samples += samples.len() as u64;
        }
    }
    Ok(())
}

fn write_detection_line(w: &mut impl Write, name: &str, d: &Detection) -> Result<()> {
    writeln!(
        w,
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
    .context("write output list")
}

fn write_sample_line(w: &mut impl Write, s: &TrainingSample) -> Result<()> {
    let label = s.category.map_or("background", |c| c.as_str());
    write!(w, "{label}").context("write sample list")?;
    for v in &s.features {
        write!(w, " {v:.6}").context("write sample list")?;
    }
    writeln!(w).context("write sample list")
}
