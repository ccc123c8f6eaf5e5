//! Decision-stump ensemble classifier.
//!
//! Model files are plain text: a `category` line opens an ensemble and
//! each `stump` line adds one weighted threshold test on a single
//! feature. Scores are weight-normalized votes in `[0, 1]`. Inference
//! is stateless, so one instance serves every worker thread.

use anyhow::{bail, ensure, Context, Result};
use rand::Rng;
use tracing::info;

use scallop_core::prepare::PreparedImage;
use scallop_core::{Candidate, Category};

use crate::{ClassLabel, Classifier, ClassifierConfig, TrainingSample};

#[derive(Debug, Clone, Copy)]
struct Stump {
    feature: usize,
    threshold: f32,
    /// +1 fires above the threshold, -1 below.
    polarity: i8,
    weight: f32,
}

impl Stump {
    fn fires(&self, features: &[f32]) -> bool {
        let v = features.get(self.feature).copied().unwrap_or(0.0);
        if self.polarity >= 0 {
            v > self.threshold
        } else {
            v <= self.threshold
        }
    }
}

pub struct BoostedClassifier {
    labels: Vec<ClassLabel>,
    ensembles: Vec<Vec<Stump>>,
    threshold: f32,
    keep_fraction: f32,
}

impl BoostedClassifier {
    pub fn from_file(path: &str, cfg: &ClassifierConfig) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read model file: {path}"))?;
        let c = Self::from_text(&text, cfg)?;
        info!(
            "classifier: loaded boosted model {} ({} classes)",
            path,
            c.labels.len()
        );
        Ok(c)
    }

    pub fn from_text(text: &str, cfg: &ClassifierConfig) -> Result<Self> {
        let mut labels: Vec<ClassLabel> = Vec::new();
        let mut ensembles: Vec<Vec<Stump>> = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("category") => {
                    let name = parts
                        .next()
                        .with_context(|| format!("line {}: category needs a name", lineno + 1))?;
                    let category = Category::parse(name)
                        .with_context(|| format!("line {}: unknown category {name}", lineno + 1))?;
                    labels.push(ClassLabel {
                        name: name.to_string(),
                        category,
                    });
                    ensembles.push(Vec::new());
                }
                Some("stump") => {
                    let ensemble = ensembles
                        .last_mut()
                        .with_context(|| format!("line {}: stump before any category", lineno + 1))?;
                    let mut field = |what: &str| -> Result<f32> {
                        parts
                            .next()
                            .with_context(|| format!("line {}: missing {what}", lineno + 1))?
                            .parse::<f32>()
                            .with_context(|| format!("line {}: bad {what}", lineno + 1))
                    };
                    let feature = field("feature index")? as usize;
                    let threshold = field("threshold")?;
                    let polarity = field("polarity")?;
                    let weight = field("weight")?;
                    ensure!(weight >= 0.0, "line {}: negative stump weight", lineno + 1);
                    ensemble.push(Stump {
                        feature,
                        threshold,
                        polarity: if polarity >= 0.0 { 1 } else { -1 },
                        weight,
                    });
                }
                Some(other) => bail!("line {}: unknown directive: {other}", lineno + 1),
                None => {}
            }
        }

        ensure!(!labels.is_empty(), "model has no category blocks");
        for (label, ensemble) in labels.iter().zip(&ensembles) {
            ensure!(!ensemble.is_empty(), "category {} has no stumps", label.name);
        }

        Ok(BoostedClassifier {
            labels,
            ensembles,
            threshold: cfg.threshold,
            keep_fraction: cfg.keep_fraction,
        })
    }

    fn score(&self, ensemble: &[Stump], features: &[f32]) -> f32 {
        let total: f32 = ensemble.iter().map(|s| s.weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let fired: f32 = ensemble
            .iter()
            .filter(|s| s.fires(features))
            .map(|s| s.weight)
            .sum();
        fired / total
    }

    fn score_candidate(&self, c: &mut Candidate) -> f32 {
        let Some(features) = c.features.as_deref() else {
            return 0.0;
        };
        let mut best_target = 0.0f32;
        for (label, ensemble) in self.labels.iter().zip(&self.ensembles) {
            let s = self.score(ensemble, features);
            let idx = label.category.index();
            if s > c.class_scores[idx] {
                c.class_scores[idx] = s;
            }
            if label.category != Category::Other && s > best_target {
                best_target = s;
            }
        }
        best_target
    }
}

impl Classifier for BoostedClassifier {
    fn classify(&self, _prep: &PreparedImage, candidates: &mut [Candidate]) -> Result<Vec<usize>> {
        let mut positives: Vec<(usize, f32)> = Vec::new();
        for (i, c) in candidates.iter_mut().enumerate() {
            let best = self.score_candidate(c);
            if best >= self.threshold && best > 0.0 {
                positives.push((i, best));
            }
        }
        positives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(positives.into_iter().map(|(i, _)| i).collect())
    }

    fn requires_features(&self) -> bool {
        true
    }

    fn detects_target(&self) -> bool {
        self.labels.iter().any(|l| l.category != Category::Other)
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
            let matched = ground_truth.iter().find(|gt| {
                c.center_distance(gt) < gt.radius().max(c.radius())
            });
            match matched {
                Some(gt) => out.push(TrainingSample {
                    features: features.clone(),
                    category: gt.label,
                }),
                None => {
                    // Check the extremes before consulting the rng so
                    // 0.0 and 1.0 behave deterministically.
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
