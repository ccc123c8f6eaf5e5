//! Blob proposals over the color classification outputs.
//!
//! Two mutually exclusive passes per run: the multi-scale saliency
//! detector (default, better for small batches or classifiers that do
//! not target this organism) and a cheaper single-scale pass over the
//! color response, favored for large batches.

use imageproc::filter::gaussian_blur_f32;

use crate::colorbank::ColorResponse;
use crate::proposals::{components, ellipse_from_points, local_maxima};
use crate::{Candidate, GrayF32, Method};

const SCALE_STEP: f32 = 1.6;
const MAX_SCALES: usize = 6;
const DOG_PEAK_FRAC: f32 = 0.15;
const COLOR_THRESHOLD_FRAC: f32 = 0.5;
const MAX_BLOB_COMPONENTS: usize = 512;

/// Multi-scale difference-of-Gaussian blob detection over the saliency map.
pub fn salient_blobs(color: &ColorResponse, min_radius_px: f32, max_radius_px: f32) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut radius = min_radius_px.max(1.0);
    let mut scales = 0;

    while radius <= max_radius_px && scales < MAX_SCALES {
        let sigma = radius / std::f32::consts::SQRT_2;
        let fine = gaussian_blur_f32(&color.saliency, sigma);
        let coarse = gaussian_blur_f32(&color.saliency, sigma * SCALE_STEP);

        let (w, h) = color.saliency.dimensions();
        let mut dog = GrayF32::new(w, h);
        let mut peak = 0.0f32;
        for (d, (f, c)) in dog.pixels_mut().zip(fine.pixels().zip(coarse.pixels())) {
            let v = (f[0] - c[0]).max(0.0);
            if v > peak {
                peak = v;
            }
            d[0] = v;
        }

        if peak > 0.0 {
            for (x, y, v) in local_maxima(&dog, radius, peak * DOG_PEAK_FRAC) {
                out.push(Candidate::circle(
                    y as f32,
                    x as f32,
                    radius,
                    (v / peak).min(1.0),
                    Method::Blob,
                ));
            }
        }

        radius *= SCALE_STEP;
        scales += 1;
    }

    out
}

/// Single-scale thresholded blob pass over the target color response.
pub fn colored_blobs(color: &ColorResponse, min_radius_px: f32, max_radius_px: f32) -> Vec<Candidate> {
    let (w, h) = color.target_map.dimensions();
    let peak = color
        .target_map
        .pixels()
        .map(|p| p[0])
        .fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Vec::new();
    }

    let threshold = peak * COLOR_THRESHOLD_FRAC;
    let mut mask = image::GrayImage::new(w, h);
    for (m, p) in mask.pixels_mut().zip(color.target_map.pixels()) {
        m[0] = if p[0] >= threshold { 255 } else { 0 };
    }

    let min_area = std::f32::consts::PI * min_radius_px * min_radius_px * 0.25;
    let max_area = std::f32::consts::PI * max_radius_px * max_radius_px * 4.0;

    let mut out = Vec::new();
    for comp in components(&mask, MAX_BLOB_COMPONENTS) {
        let area = comp.len() as f32;
        if area < min_area || area > max_area {
            continue;
        }
        let Some((row, col, major, minor, angle)) = ellipse_from_points(&comp) else {
            continue;
        };
        let mean_response = comp
            .iter()
            .map(|&(x, y)| color.target_map.get_pixel(x, y)[0])
            .sum::<f32>()
            / area;

        let mut cand = Candidate::circle(row, col, major, (mean_response / peak).min(1.0), Method::Blob);
        cand.minor = minor;
        cand.angle = angle;
        out.push(cand);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colorbank::ColorBank;
    use crate::prepare;
    use image::RgbImage;

    fn brown_disk(w: u32, h: u32, cx: f32, cy: f32, r: f32) -> ColorResponse {
        let mut img = RgbImage::from_pixel(w, h, image::Rgb([150, 140, 120]));
        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if (dx * dx + dy * dy).sqrt() < r {
                    img.put_pixel(x, y, image::Rgb([120, 80, 50]));
                }
            }
        }
        let lab = prepare::rgb_to_lab(&img);
        ColorBank::builtin().classify(&lab, r * 0.6, r * 1.8)
    }

    #[test]
    fn salient_blobs_find_the_disk() {
        let color = brown_disk(160, 120, 80.0, 60.0, 12.0);
        let cands = salient_blobs(&color, 8.0, 24.0);
        assert!(!cands.is_empty());
        let best = cands
            .iter()
            .min_by(|a, b| {
                let da = (a.row - 60.0).hypot(a.col - 80.0);
                let db = (b.row - 60.0).hypot(b.col - 80.0);
                da.partial_cmp(&db).unwrap()
            })
            .unwrap();
        let err = (best.row - 60.0).hypot(best.col - 80.0);
        assert!(err < 8.0, "nearest blob candidate is {err}px off center");
    }

    #[test]
    fn colored_blobs_recover_disk_geometry() {
        let color = brown_disk(160, 120, 80.0, 60.0, 12.0);
        let cands = colored_blobs(&color, 6.0, 30.0);
        assert_eq!(cands.len(), 1, "expected a single colored blob");
        let c = &cands[0];
        assert!((c.row - 60.0).abs() < 3.0 && (c.col - 80.0).abs() < 3.0);
        assert!((c.major - 12.0).abs() < 4.0, "major = {}", c.major);
    }

    #[test]
    fn empty_response_yields_empty_sets() {
        let blank = RgbImage::new(32, 32);
        let lab = prepare::rgb_to_lab(&blank);
        let color = ColorBank::builtin().classify(&lab, 4.0, 10.0);
        // Black image has near-zero target response everywhere; both
        // passes must return cleanly rather than erroring.
        let _ = salient_blobs(&color, 4.0, 10.0);
        let _ = colored_blobs(&color, 4.0, 10.0);
    }
}
