//! Boundary search around each candidate.
//!
//! Rays cast from the candidate center locate the strongest gradient
//! response per direction; the resulting boundary radii drive the shape
//! descriptor. The expensive variant reruns with a denser fan on
//! positives only and refines the stored ellipse.

use crate::gradients::GradientChain;
use crate::features::{window_in_bounds, SHAPE_OFFSET};
use crate::Candidate;

const RAYS_CHEAP: usize = 24;
const RAYS_EXPENSIVE: usize = 64;
const SEARCH_INNER_FRAC: f32 = 0.5;
const SEARCH_OUTER_FRAC: f32 = 1.5;
const RAY_STEP: f32 = 0.5;

struct BoundaryStats {
    mean_r: f32,
    std_r: f32,
    min_r: f32,
    max_r: f32,
    support: f32,
    mean_mag: f32,
    elongation: f32,
    inner_mag: f32,
    roundness: f32,
}

fn trace_boundary(chain: &GradientChain, c: &Candidate, rays: usize) -> BoundaryStats {
    let r = c.radius();
    let mag_floor = chain.max_magnitude * 0.05;

    let mut radii = Vec::with_capacity(rays);
    let mut mags = Vec::with_capacity(rays);
    let mut inner_sum = 0.0f32;
    let mut inner_n = 0u32;

    for i in 0..rays {
        let theta = 2.0 * std::f32::consts::PI * i as f32 / rays as f32;
        let (dy, dx) = theta.sin_cos();

        let mut best_t = r;
        let mut best_mag = 0.0f32;
        let mut t = SEARCH_INNER_FRAC * r;
        while t <= SEARCH_OUTER_FRAC * r {
            let m = chain.magnitude_at(c.col + dx * t, c.row + dy * t);
            if m > best_mag {
                best_mag = m;
                best_t = t;
            }
            if t < r * 0.5 + RAY_STEP {
                inner_sum += m;
                inner_n += 1;
            }
            t += RAY_STEP;
        }
        radii.push(best_t);
        mags.push(best_mag);
    }

    let n = rays as f32;
    let mean_r = radii.iter().sum::<f32>() / n;
    let var_r = radii.iter().map(|&x| (x - mean_r) * (x - mean_r)).sum::<f32>() / n;
    let min_r = radii.iter().cloned().fold(f32::MAX, f32::min);
    let max_r = radii.iter().cloned().fold(0.0f32, f32::max);
    let mean_mag = mags.iter().sum::<f32>() / n;
    let support = mags.iter().filter(|&&m| m > mag_floor).count() as f32 / n;
    let roundness = radii
        .iter()
        .filter(|&&x| (x - mean_r).abs() < 0.2 * mean_r.max(1.0))
        .count() as f32
        / n;

    BoundaryStats {
        mean_r,
        std_r: var_r.sqrt(),
        min_r,
        max_r,
        support,
        mean_mag,
        elongation: max_r / min_r.max(1e-3),
        inner_mag: if inner_n > 0 { inner_sum / inner_n as f32 } else { 0.0 },
        roundness,
    }
}

fn write_shape(c: &mut Candidate, stats: &BoundaryStats, chain: &GradientChain) {
    let r = c.radius().max(1e-3);
    let norm = chain.max_magnitude.max(1e-6);
    let Some(features) = c.features.as_mut() else {
        return;
    };
    let seg = &mut features[SHAPE_OFFSET..SHAPE_OFFSET + super::SHAPE_LEN];
    seg[0] = stats.mean_r / r;
    seg[1] = stats.std_r / r;
    seg[2] = stats.min_r / r;
    seg[3] = stats.max_r / r;
    seg[4] = stats.support;
    seg[5] = stats.mean_mag / norm;
    seg[6] = stats.elongation;
    seg[7] = stats.inner_mag / norm;
    seg[8] = stats.mean_mag / stats.inner_mag.max(1e-6);
    seg[9] = stats.roundness;
}

/// Cheap boundary pass over every candidate.
pub fn edge_search(chain: &GradientChain, candidates: &mut [Candidate]) {
    let (w, h) = chain.magnitude.dimensions();
    for c in candidates.iter_mut() {
        if !window_in_bounds(c, w, h) {
            continue;
        }
        let stats = trace_boundary(chain, c, RAYS_CHEAP);
        write_shape(c, &stats, chain);
    }
}

/// Dense boundary pass over positives. Also refines the stored ellipse
/// toward the located boundary when support is strong.
pub fn expensive_edge_search(chain: &GradientChain, candidates: &mut [Candidate]) {
    let (w, h) = chain.magnitude.dimensions();
    for c in candidates.iter_mut() {
        if !window_in_bounds(c, w, h) {
            continue;
        }
        let stats = trace_boundary(chain, c, RAYS_EXPENSIVE);
        if stats.support > 0.5 {
            let aspect = (c.minor / c.major.max(1e-3)).clamp(0.5, 1.0);
            c.major = stats.mean_r;
            c.minor = stats.mean_r * aspect;
        }
        write_shape(c, &stats, chain);
    }
}
