//! Unoriented histogram-of-gradients descriptor.
//!
//! Computed over a radius-normalized window: one histogram for the
//! inner disk, one for the surrounding annulus, both L2-normalized.
//! Runs twice per candidate (grayscale, then saliency) into different
//! vector segments.

use crate::features::{window_in_bounds, HOG_LEN, WINDOW_FRAC};
use crate::{Candidate, GrayF32};

pub const BINS: usize = HOG_LEN / 2;

pub fn generate(source: &GrayF32, candidates: &mut [Candidate], offset: usize) {
    let (w, h) = source.dimensions();
    for c in candidates.iter_mut() {
        if !window_in_bounds(c, w, h) {
            continue;
        }
        let r = c.radius();
        let half = (WINDOW_FRAC * r).ceil() as i32;
        let cx = c.col.round() as i32;
        let cy = c.row.round() as i32;

        let mut inner = [0.0f32; BINS];
        let mut outer = [0.0f32; BINS];

        for dy in -half..=half {
            for dx in -half..=half {
                let x = cx + dx;
                let y = cy + dy;
                if x < 1 || y < 1 || x >= w as i32 - 1 || y >= h as i32 - 1 {
                    continue;
                }
                let d = ((dx * dx + dy * dy) as f32).sqrt();
                if d > WINDOW_FRAC * r {
                    continue;
                }

                let gx = source.get_pixel(x as u32 + 1, y as u32)[0]
                    - source.get_pixel(x as u32 - 1, y as u32)[0];
                let gy = source.get_pixel(x as u32, y as u32 + 1)[0]
                    - source.get_pixel(x as u32, y as u32 - 1)[0];
                let mag = (gx * gx + gy * gy).sqrt();
                if mag <= 0.0 {
                    continue;
                }

                // Fold orientation to [0, pi): the descriptor is unoriented.
                let mut angle = gy.atan2(gx);
                if angle < 0.0 {
                    angle += std::f32::consts::PI;
                }
                let bin = ((angle / std::f32::consts::PI) * BINS as f32) as usize % BINS;

                if d <= r {
                    inner[bin] += mag;
                } else {
                    outer[bin] += mag;
                }
            }
        }

        normalize(&mut inner);
        normalize(&mut outer);

        let Some(features) = c.features.as_mut() else {
            continue;
        };
        features[offset..offset + BINS].copy_from_slice(&inner);
        features[offset + BINS..offset + HOG_LEN].copy_from_slice(&outer);
    }
}

fn normalize(hist: &mut [f32; BINS]) {
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-6 {
        for v in hist.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_LEN;
    use crate::Method;

    fn gradient_field(w: u32, h: u32) -> GrayF32 {
        // Vertical ramp: all gradient energy in one orientation bin.
        GrayF32::from_fn(w, h, |_, y| image::Luma([y as f32 * 0.1]))
    }

    #[test]
    fn ramp_concentrates_in_one_bin() {
        let src = gradient_field(64, 64);
        let mut c = Candidate::circle(32.0, 32.0, 10.0, 0.5, Method::Blob);
        c.features = Some(vec![0.0; FEATURE_LEN]);
        let mut cands = vec![c];
        generate(&src, &mut cands, 0);

        let f = cands[0].features.as_ref().unwrap();
        let inner = &f[0..BINS];
        let peak_bin = inner
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        // Vertical gradient folds to pi/2.
        assert_eq!(peak_bin, BINS / 2);
        assert!((inner.iter().map(|v| v * v).sum::<f32>().sqrt() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn descriptor_is_radius_normalized() {
        // Same pattern at two radii should produce similar histograms.
        let src = gradient_field(128, 128);
        let mut a = Candidate::circle(64.0, 64.0, 8.0, 0.5, Method::Blob);
        let mut b = Candidate::circle(64.0, 64.0, 16.0, 0.5, Method::Blob);
        a.features = Some(vec![0.0; FEATURE_LEN]);
        b.features = Some(vec![0.0; FEATURE_LEN]);
        let mut cands = vec![a, b];
        generate(&src, &mut cands, 0);

        let fa = cands[0].features.as_ref().unwrap();
        let fb = cands[1].features.as_ref().unwrap();
        let dot: f32 = fa[0..BINS].iter().zip(&fb[0..BINS]).map(|(x, y)| x * y).sum();
        assert!(dot > 0.95, "histograms should nearly align, dot = {dot}");
    }
}
