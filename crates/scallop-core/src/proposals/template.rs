//! Double-donut template proposals.
//!
//! A scallop rim shows up as gradient energy on two concentric rings
//! (outer shell lip, inner growth ring) with a quiet band between. The
//! detector sweeps the radius range and correlates that pattern against
//! the gradient magnitude, honoring an optional exclusion mask.

use image::GrayImage;

use crate::gradients::GradientChain;
use crate::{Candidate, Method};

const RADIUS_STEP: f32 = 1.33;
const INNER_RING_FRAC: f32 = 0.6;
const GAP_RING_FRAC: f32 = 0.8;
const SCORE_THRESHOLD: f32 = 0.08;
const RING_SAMPLES_MIN: usize = 16;
const RING_SAMPLES_MAX: usize = 48;

pub fn template_candidates(
    chain: &GradientChain,
    min_radius_px: f32,
    max_radius_px: f32,
    exclusion_mask: Option<&GrayImage>,
) -> Vec<Candidate> {
    if chain.max_magnitude <= 0.0 {
        return Vec::new();
    }
    let (w, h) = chain.magnitude.dimensions();

    let mut scored: Vec<(f32, f32, f32, f32)> = Vec::new(); // (score, row, col, radius)
    let mut radius = min_radius_px.max(2.0);

    while radius <= max_radius_px {
        let outer = ring_offsets(radius);
        let inner = ring_offsets(radius * INNER_RING_FRAC);
        let gap = ring_offsets(radius * GAP_RING_FRAC);
        let step = (radius / 3.0).max(1.0) as u32;

        let margin = radius.ceil() as u32 + 1;
        if 2 * margin >= w || 2 * margin >= h {
            break;
        }

        let mut y = margin;
        while y < h - margin {
            let mut x = margin;
            while x < w - margin {
                if let Some(mask) = exclusion_mask {
                    if mask.get_pixel(x, y)[0] == 0 {
                        x += step;
                        continue;
                    }
                }

                let outer_mean = ring_mean(chain, x, y, &outer);
                let inner_mean = ring_mean(chain, x, y, &inner);
                let gap_mean = ring_mean(chain, x, y, &gap);
                let score =
                    (outer_mean + inner_mean - 2.0 * gap_mean) / chain.max_magnitude;
                if score > SCORE_THRESHOLD {
                    scored.push((score, y as f32, x as f32, radius));
                }
                x += step;
            }
            y += step;
        }

        radius *= RADIUS_STEP;
    }

    // Greedy suppression, strongest first.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut out: Vec<Candidate> = Vec::new();
    for (score, row, col, r) in scored {
        let too_close = out.iter().any(|kept| {
            let d = (kept.row - row).hypot(kept.col - col);
            d < 0.7 * kept.radius().max(r)
        });
        if !too_close {
            out.push(Candidate::circle(row, col, r, score.min(1.0), Method::Template));
        }
    }
    out
}

fn ring_offsets(radius: f32) -> Vec<(f32, f32)> {
    let n = ((2.0 * std::f32::consts::PI * radius) as usize)
        .clamp(RING_SAMPLES_MIN, RING_SAMPLES_MAX);
    (0..n)
        .map(|i| {
            let theta = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            (radius * theta.cos(), radius * theta.sin())
        })
        .collect()
}

fn ring_mean(chain: &GradientChain, cx: u32, cy: u32, offsets: &[(f32, f32)]) -> f32 {
    let mut sum = 0.0f32;
    for &(dx, dy) in offsets {
        sum += chain.magnitude_at(cx as f32 + dx, cy as f32 + dy);
    }
    sum / offsets.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradients::gradient_chain;

    fn donut_image(w: u32, h: u32, cx: f32, cy: f32, r: f32) -> GrayImage {
        // Bright disk with a darker core produces rim + inner-ring edges.
        GrayImage::from_fn(w, h, |x, y| {
            let d = (x as f32 - cx).hypot(y as f32 - cy);
            if d < r * 0.55 {
                image::Luma([70])
            } else if d < r {
                image::Luma([200])
            } else {
                image::Luma([110])
            }
        })
    }

    #[test]
    fn donut_pattern_is_detected_near_center() {
        let img = donut_image(140, 140, 70.0, 70.0, 16.0);
        let chain = gradient_chain(&img, 10.0);
        let cands = template_candidates(&chain, 10.0, 26.0, None);
        assert!(!cands.is_empty(), "no template candidates at all");
        let best = &cands[0];
        let err = (best.row - 70.0).hypot(best.col - 70.0);
        assert!(err < 8.0, "best template candidate is {err}px off");
    }

    #[test]
    fn exclusion_mask_blocks_detection() {
        let img = donut_image(140, 140, 70.0, 70.0, 16.0);
        let chain = gradient_chain(&img, 10.0);
        let mask = GrayImage::new(140, 140); // everything excluded
        let cands = template_candidates(&chain, 10.0, 26.0, Some(&mask));
        assert!(cands.is_empty());
    }

    #[test]
    fn flat_gradient_yields_nothing() {
        let img = GrayImage::from_pixel(100, 100, image::Luma([128]));
        let chain = gradient_chain(&img, 8.0);
        assert!(template_candidates(&chain, 8.0, 20.0, None).is_empty());
    }
}
