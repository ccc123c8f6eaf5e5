//! Gabor filter bank energies.
//!
//! Four orientations at three wavelengths tied to the candidate radius.
//! Responses are computed on a sparse sample grid inside the window
//! rather than by full convolution; only the mean energy per filter is
//! kept.

use crate::features::{window_in_bounds, GABOR_LEN, GABOR_OFFSET};
use crate::{Candidate, GrayF32};

const ORIENTATIONS: usize = 4;
const SCALES: usize = 3;
/// Wavelengths as fractions of the candidate radius.
const WAVELENGTH_FRACS: [f32; SCALES] = [0.25, 0.5, 1.0];
const SIGMA_PER_LAMBDA: f32 = 0.56;
const GAMMA: f32 = 0.5;
const GRID_STEPS: i32 = 8;
const MAX_KERNEL_HALF: i32 = 15;

pub fn gabor_features(source: &GrayF32, candidates: &mut [Candidate]) {
    let (w, h) = source.dimensions();
    for c in candidates.iter_mut() {
        if !window_in_bounds(c, w, h) {
            continue;
        }
        let r = c.radius();
        let mut energies = [0.0f32; GABOR_LEN];

        for (si, frac) in WAVELENGTH_FRACS.iter().enumerate() {
            let lambda = (frac * r).max(2.0);
            let sigma = SIGMA_PER_LAMBDA * lambda;
            let half = ((2.5 * sigma).ceil() as i32).min(MAX_KERNEL_HALF);

            for oi in 0..ORIENTATIONS {
                let theta = std::f32::consts::PI * oi as f32 / ORIENTATIONS as f32;
                let (sin_t, cos_t) = theta.sin_cos();

                let mut sum = 0.0f32;
                let mut n = 0u32;
                for gy in 0..GRID_STEPS {
                    for gx in 0..GRID_STEPS {
                        let sx = c.col + r * (2.0 * (gx as f32 + 0.5) / GRID_STEPS as f32 - 1.0);
                        let sy = c.row + r * (2.0 * (gy as f32 + 0.5) / GRID_STEPS as f32 - 1.0);
                        if let Some(e) =
                            response_at(source, sx, sy, half, sigma, lambda, sin_t, cos_t)
                        {
                            sum += e;
                            n += 1;
                        }
                    }
                }
                if n > 0 {
                    energies[si * ORIENTATIONS + oi] = sum / n as f32;
                }
            }
        }

        let Some(features) = c.features.as_mut() else {
            continue;
        };
        features[GABOR_OFFSET..GABOR_OFFSET + GABOR_LEN].copy_from_slice(&energies);
    }
}

/// Even and odd Gabor response magnitude at one sample point; `None`
/// when the kernel would leave the image.
fn response_at(
    source: &GrayF32,
    x: f32,
    y: f32,
    half: i32,
    sigma: f32,
    lambda: f32,
    sin_t: f32,
    cos_t: f32,
) -> Option<f32> {
    let cx = x.round() as i32;
    let cy = y.round() as i32;
    let (w, h) = source.dimensions();
    if cx - half < 0 || cy - half < 0 || cx + half >= w as i32 || cy + half >= h as i32 {
        return None;
    }

    let two_sigma2 = 2.0 * sigma * sigma;
    let freq = 2.0 * std::f32::consts::PI / lambda;
    let mut even = 0.0f32;
    let mut odd = 0.0f32;

    for dy in -half..=half {
        for dx in -half..=half {
            let xr = dx as f32 * cos_t + dy as f32 * sin_t;
            let yr = -(dx as f32) * sin_t + dy as f32 * cos_t;
            let envelope = (-(xr * xr + GAMMA * GAMMA * yr * yr) / two_sigma2).exp();
            let phase = freq * xr;
            let v = source.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0];
            even += v * envelope * phase.cos();
            odd += v * envelope * phase.sin();
        }
    }
    Some((even * even + odd * odd).sqrt())
}
