//! Candidate classification backends.
//!
//! Every backend implements [`Classifier`]; the pipeline only ever sees
//! the trait object. The boosted backend is always available; the CNN
//! backend links against the C inference runtime and is gated behind
//! the `cnn` cargo feature.

pub mod boosted;
#[cfg(feature = "cnn")]
pub mod cnn;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use scallop_core::prepare::PreparedImage;
use scallop_core::{Candidate, Category};

/// One output class of a classifier.
#[derive(Debug, Clone)]
pub struct ClassLabel {
    pub name: String,
    pub category: Category,
}

/// A feature vector paired with its resolved class, written out during
/// training extraction.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: Vec<f32>,
    /// `None` marks a background sample.
    pub category: Option<Category>,
}

/// Classification backend selection plus everything a backend needs to
/// load itself. Deserialized from the `[classifier]` config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Cache key; runs reuse one instance per distinct key.
    pub key: String,
    /// "boosted" or "cnn".
    pub kind: String,
    pub model_path: String,
    #[serde(default)]
    pub suppression_model_path: Option<String>,
    /// Acceptance threshold on the winning class score.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_suppression_threshold")]
    pub suppression_threshold: f32,
    /// Side length of the square chip fed to the CNN backend.
    #[serde(default = "default_chip_size")]
    pub chip_size: u32,
    /// Optional boosted model used to reject cheap negatives before the
    /// CNN runs.
    #[serde(default)]
    pub prefilter_model_path: Option<String>,
    /// Probability of keeping a background sample during training
    /// extraction.
    #[serde(default = "default_keep_fraction")]
    pub keep_fraction: f32,
}

fn default_threshold() -> f32 {
    0.0
}

fn default_suppression_threshold() -> f32 {
    0.5
}

fn default_chip_size() -> u32 {
    64
}

fn default_keep_fraction() -> f32 {
    1.0
}

/// A classification backend. Implementations are shared across worker
/// threads behind an `Arc`.
pub trait Classifier: Send + Sync {
    /// Score every candidate in place and return the indices of the
    /// positives, strongest first. Zero candidates in, zero out.
    fn classify(&self, prep: &PreparedImage, candidates: &mut [Candidate]) -> Result<Vec<usize>>;

    /// Whether candidates must carry feature vectors before `classify`.
    fn requires_features(&self) -> bool;

    /// Whether this backend produces target detections at all, as
    /// opposed to only scoring for sample extraction.
    fn detects_target(&self) -> bool;

    /// Pair candidates with ground truth and emit labelled samples.
    fn extract_samples(
        &self,
        prep: &PreparedImage,
        candidates: &[Candidate],
        ground_truth: &[Candidate],
    ) -> Result<Vec<TrainingSample>>;

    fn class_count(&self) -> usize;

    fn label(&self, index: usize) -> &ClassLabel;
}

impl std::fmt::Debug for dyn Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Classifier")
    }
}

/// Build the backend named by the configuration. Failure here is fatal
/// at startup; the pipeline never retries a classifier load.
pub fn load_classifier(cfg: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match cfg.kind.as_str() {
        "boosted" => {
            let c = boosted::BoostedClassifier::from_file(&cfg.model_path, cfg)
                .with_context(|| format!("load boosted model: {}", cfg.model_path))?;
            Ok(Arc::new(c))
        }
        #[cfg(feature = "cnn")]
        "cnn" => {
            let c = cnn::CnnClassifier::new(cfg)
                .with_context(|| format!("load cnn model: {}", cfg.model_path))?;
            Ok(Arc::new(c))
        }
        #[cfg(not(feature = "cnn"))]
        "cnn" => {
            anyhow::bail!("classifier.kind=\"cnn\" but binary not built with --features cnn")
        }
        other => anyhow::bail!("unknown classifier kind: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kind: &str) -> ClassifierConfig {
        ClassifierConfig {
            key: "k".into(),
            kind: kind.into(),
            model_path: "/nonexistent".into(),
            suppression_model_path: None,
            threshold: 0.0,
            suppression_threshold: 0.5,
            chip_size: 64,
            prefilter_model_path: None,
            keep_fraction: 1.0,
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = load_classifier(&cfg("svm")).unwrap_err();
        assert!(err.to_string().contains("unknown classifier kind"));
    }

    #[cfg(not(feature = "cnn"))]
    #[test]
    fn cnn_without_the_feature_fails_with_a_hint() {
        let err = load_classifier(&cfg("cnn")).unwrap_err();
        assert!(err.to_string().contains("--features cnn"));
    }

    #[test]
    fn config_defaults_apply() {
        let cfg: ClassifierConfig = toml::from_str(
            r#"
            key = "default"
            kind = "boosted"
            model_path = "models/scallop.adb"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chip_size, 64);
        assert_eq!(cfg.keep_fraction, 1.0);
        assert!(cfg.suppression_model_path.is_none());
    }
}
