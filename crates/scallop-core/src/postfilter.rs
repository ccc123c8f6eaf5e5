//! Post-classification cleanup: containment suppression, category
//! resolution and the map back to original-image coordinates.

use tracing::debug;

use crate::{Candidate, Category, Detection, CATEGORY_COUNT};

/// When two positives overlap so that one sits inside the other, keep
/// the outer one. The classifier frequently fires on both the organism
/// and a high-contrast region of its interior.
pub fn remove_inside_points(candidates: &mut Vec<Candidate>) {
    let before = candidates.len();
    let mut keep = vec![true; candidates.len()];
    for i in 0..candidates.len() {
        for j in 0..candidates.len() {
            if i == j || !keep[j] {
                continue;
            }
            if candidates[j].contains(&candidates[i]) && !candidates[i].contains(&candidates[j]) {
                keep[i] = false;
                break;
            }
        }
    }
    let mut it = keep.iter();
    candidates.retain(|_| *it.next().unwrap_or(&true));
    if candidates.len() != before {
        debug!("remove_inside_points: {} -> {}", before, candidates.len());
    }
}

/// Assign each positive its best-scoring category. Scores below
/// `min_score` fall through to `Other`.
pub fn resolve_categories(candidates: &mut [Candidate], min_score: f32) {
    for c in candidates.iter_mut() {
        let mut best = 0;
        for i in 1..CATEGORY_COUNT {
            if c.class_scores[i] > c.class_scores[best] {
                best = i;
            }
        }
        c.label = Some(if c.class_scores[best] >= min_score {
            Category::from_index(best)
        } else {
            Category::Other
        });
    }
}

/// Map labelled candidates back to original-image pixel coordinates.
pub fn to_detections(candidates: &[Candidate], resize_factor: f32) -> Vec<Detection> {
    let inv = 1.0 / resize_factor.max(1e-6);
    candidates
        .iter()
        .filter_map(|c| {
            let category = c.label?;
            Some(Detection {
                category,
                row: c.row * inv,
                col: c.col * inv,
                angle: c.angle,
                major: c.major * inv,
                minor: c.minor * inv,
                class_scores: c.class_scores,
            })
        })
        .collect()
}
