//! Local-threshold segmentation proposals.
//!
//! Adaptive mean thresholding at a block size tuned to the minimum
//! expected radius, run at both polarities since shells can sit
//! brighter or darker than the surrounding sediment.

use image::GrayImage;
use imageproc::contrast::adaptive_threshold;

use crate::proposals::{components, ellipse_from_points};
use crate::{Candidate, Method};

const MAX_COMPONENTS: usize = 512;

pub fn adaptive_candidates(gray8: &GrayImage, min_radius_px: f32, max_radius_px: f32) -> Vec<Candidate> {
    let block_radius = (min_radius_px * 2.0).round().max(2.0) as u32;

    let bright = adaptive_threshold(gray8, block_radius);

    let mut inverted = gray8.clone();
    for p in inverted.pixels_mut() {
        p[0] = 255 - p[0];
    }
    let dark = adaptive_threshold(&inverted, block_radius);

    let min_area = std::f32::consts::PI * min_radius_px * min_radius_px * 0.25;
    let max_area = std::f32::consts::PI * max_radius_px * max_radius_px * 2.0;

    let mut out = Vec::new();
    for mask in [&bright, &dark] {
        for comp in components(mask, MAX_COMPONENTS) {
            let area = comp.len() as f32;
            if area < min_area || area > max_area {
                continue;
            }
            let Some((row, col, major, minor, angle)) = ellipse_from_points(&comp) else {
                continue;
            };
            // Compactness of the component against its fitted ellipse;
            // ragged sediment patches score low and are cheap to drop
            // during consolidation.
            let fill = area / (std::f32::consts::PI * major * minor).max(1.0);
            if fill < 0.3 {
                continue;
            }

            let mut cand = Candidate::circle(row, col, major, fill.min(1.0), Method::AdaptiveThreshold);
            cand.minor = minor;
            cand.angle = angle;
            out.push(cand);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bright_disk_segments_out() {
        let mut img = GrayImage::from_pixel(120, 120, image::Luma([90]));
        for y in 0..120u32 {
            for x in 0..120u32 {
                let dx = x as f32 - 60.0;
                let dy = y as f32 - 60.0;
                if (dx * dx + dy * dy).sqrt() < 10.0 {
                    img.put_pixel(x, y, image::Luma([210]));
                }
            }
        }
        let cands = adaptive_candidates(&img, 6.0, 20.0);
        assert!(
            cands.iter().any(|c| (c.row - 60.0).abs() < 4.0
                && (c.col - 60.0).abs() < 4.0
                && (c.major - 10.0).abs() < 5.0),
            "no candidate near the disk: {cands:?}"
        );
    }

    #[test]
    fn dark_disk_is_caught_by_the_inverted_pass() {
        let mut img = GrayImage::from_pixel(120, 120, image::Luma([180]));
        for y in 0..120u32 {
            for x in 0..120u32 {
                let dx = x as f32 - 40.0;
                let dy = y as f32 - 70.0;
                if (dx * dx + dy * dy).sqrt() < 9.0 {
                    img.put_pixel(x, y, image::Luma([40]));
                }
            }
        }
        let cands = adaptive_candidates(&img, 5.0, 20.0);
        assert!(cands
            .iter()
            .any(|c| (c.row - 70.0).abs() < 4.0 && (c.col - 40.0).abs() < 4.0));
    }

    #[test]
    fn flat_image_produces_no_candidates() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([128]));
        let cands = adaptive_candidates(&img, 4.0, 12.0);
        assert!(cands.len() <= 2, "flat image should produce nearly nothing: {cands:?}");
    }
}
