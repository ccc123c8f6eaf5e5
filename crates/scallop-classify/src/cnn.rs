//! CNN backend over the TensorFlow Lite C API.
//!
//! Each candidate is scored on a fixed-size chip cropped around its
//! ellipse. A primary network produces per-category scores; an optional
//! suppression network vetoes false positives that the primary accepts.
//! The interpreter is not reentrant, so both live behind one mutex and
//! concurrent classify calls serialize on it.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use rand::Rng;
use tracing::info;

use scallop_core::prepare::PreparedImage;
use scallop_core::{Candidate, Category, CATEGORY_COUNT};

use crate::boosted::BoostedClassifier;
use crate::{ClassLabel, Classifier, ClassifierConfig, TrainingSample};

/// Chip side length as a multiple of the candidate radius.
const CHIP_RADIUS_FRAC: f32 = 2.5;

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(
        options: *mut TfLiteInterpreterOptions,
        num_threads: c_int,
    );

    fn TfLiteInterpreterCreate(
        model: *const TfLiteModel,
        options: *const TfLiteInterpreterOptions,
    ) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(
        interpreter: *mut TfLiteInterpreter,
        index: c_int,
    ) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(
        interpreter: *mut TfLiteInterpreter,
        index: c_int,
    ) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
}

struct Net {
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

unsafe impl Send for Net {}

impl Net {
    fn load(path: &str) -> Result<Self> {
        let cpath = CString::new(path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load model: {}", path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create interpreter options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, 1) }

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!interp.is_null(), "failed to create interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("classifier: loaded cnn model: {}", path);
        Ok(Net { model, opts, interp })
    }

    /// Run one chip through the network and read back `n` scores.
    fn invoke(&mut self, chip: &image::RgbImage, n: usize) -> Result<Vec<f32>> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");

        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let need = chip.as_raw().len();
        anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
        unsafe { ptr::copy_nonoverlapping(chip.as_raw().as_ptr(), in_ptr, need) }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out.is_null(), "no output tensor");
        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        anyhow::ensure!(out_len >= n, "output tensor too small: {} < {}", out_len, n);

        let raw = unsafe { std::slice::from_raw_parts(out_ptr, n) };
        Ok(raw.to_vec())
    }
}

impl Drop for Net {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() {
                TfLiteInterpreterDelete(self.interp);
            }
            if !self.opts.is_null() {
                TfLiteInterpreterOptionsDelete(self.opts);
            }
            if !self.model.is_null() {
                TfLiteModelDelete(self.model);
            }
        }
    }
}

struct Nets {
    primary: Net,
    suppression: Option<Net>,
}

pub struct CnnClassifier {
    nets: Mutex<Nets>,
    prefilter: Option<BoostedClassifier>,
    labels: Vec<ClassLabel>,
    threshold: f32,
    suppression_threshold: f32,
    chip_size: u32,
    keep_fraction: f32,
}

impl CnnClassifier {
    pub fn new(cfg: &ClassifierConfig) -> Result<Self> {
        let primary = Net::load(&cfg.model_path)?;
        let suppression = match &cfg.suppression_model_path {
            Some(path) => Some(Net::load(path).context("load suppression model")?),
            None => None,
        };
        let prefilter = match &cfg.prefilter_model_path {
            Some(path) => Some(BoostedClassifier::from_file(path, cfg)?),
            None => None,
        };

        let labels = Category::ALL
            .iter()
            .map(|&category| ClassLabel {
                name: category.as_str().to_string(),
                category,
            })
            .collect();

        Ok(CnnClassifier {
            nets: Mutex::new(Nets { primary, suppression }),
            prefilter,
            labels,
            threshold: cfg.threshold,
            suppression_threshold: cfg.suppression_threshold,
            chip_size: cfg.chip_size,
            keep_fraction: cfg.keep_fraction,
        })
    }

    fn crop_chip(&self, prep: &PreparedImage, c: &Candidate) -> Option<image::RgbImage> {
        let half = CHIP_RADIUS_FRAC * c.radius();
        let x0 = c.col - half;
        let y0 = c.row - half;
        let side = 2.0 * half;
        if x0 < 0.0
            || y0 < 0.0
            || x0 + side >= prep.width as f32
            || y0 + side >= prep.height as f32
        {
            return None;
        }
        let crop = imageops::crop_imm(&prep.rgb8, x0 as u32, y0 as u32, side as u32, side as u32)
            .to_image();
        Some(imageops::resize(
            &crop,
            self.chip_size,
            self.chip_size,
            FilterType::Triangle,
        ))
    }
}

impl Classifier for CnnClassifier {
    fn classify(&self, prep: &PreparedImage, candidates: &mut [Candidate]) -> Result<Vec<usize>> {
        let mut positives: Vec<(usize, f32)> = Vec::new();
        let mut nets = self
            .nets
            .lock()
            .map_err(|_| anyhow::anyhow!("cnn interpreter mutex poisoned"))?;

        for (i, c) in candidates.iter_mut().enumerate() {
            if let Some(pre) = &self.prefilter {
                // Cheap reject before the network runs.
                let mut scratch = [c.clone()];
                if pre.classify(prep, &mut scratch)?.is_empty() {
                    continue;
                }
            }
            let Some(chip) = self.crop_chip(prep, c) else {
                continue;
            };

            let scores = nets.primary.invoke(&chip, CATEGORY_COUNT)?;
            c.class_scores.copy_from_slice(&scores);

            let (best_idx, best) = scores
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or((Category::Other.index(), 0.0));
            if best < self.threshold || Category::from_index(best_idx) == Category::Other {
                continue;
            }

            if let Some(supp) = nets.suppression.as_mut() {
                let veto = supp.invoke(&chip, 1)?;
                if veto[0] >= self.suppression_threshold {
                    continue;
                }
            }
            positives.push((i, best));
        }

        positives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(positives.into_iter().map(|(i, _)| i).collect())
    }

    fn requires_features(&self) -> bool {
        self.prefilter.is_some()
    }

    fn detects_target(&self) -> bool {
        true
    }

    fn extract_samples(
        &self,
        _prep: &PreparedImage,
        candidates: &[Candidate],
        ground_truth: &[Candidate],
    ) -> Result<Vec<TrainingSample>> {
        let mut rng = rand::thread_rng();
        let mut out = Vec::new();
        for c in candidates {
            let Some(features) = c.features.as_ref() else {
                continue;
            };
            let matched = ground_truth
                .iter()
                .find(|gt| c.center_distance(gt) < gt.radius().max(c.radius()));
            match matched {
                Some(gt) => out.push(TrainingSample {
                    features: features.clone(),
                    category: gt.label,
                }),
                None => {
                    let keep = if self.keep_fraction >= 1.0 {
                        true
                    } else if self.keep_fraction <= 0.0 {
                        false
                    } else {
                        rng.gen::<f32>() < self.keep_fraction
                    };
                    if keep {
                        out.push(TrainingSample {
                            features: features.clone(),
                            category: None,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    fn class_count(&self) -> usize {
        self.labels.len()
    }

    fn label(&self, index: usize) -> &ClassLabel {
        &self.labels[index]
    }
}
