//! Shared gradient chain.
//!
//! Computed once per image and read by the template and edge proposal
//! generators and by shape/HoG feature extraction.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_scharr, vertical_scharr};

use crate::GrayF32;

#[derive(Debug)]
pub struct GradientChain {
    pub dx: GrayF32,
    pub dy: GrayF32,
    pub magnitude: GrayF32,
    /// Orientation in radians, range (-pi, pi].
    pub orientation: GrayF32,
    /// Edge pixels surviving both a permissive and a strict Canny pass.
    pub stable_edges: GrayImage,
    pub max_magnitude: f32,
}

impl GradientChain {
    pub fn magnitude_at(&self, col: f32, row: f32) -> f32 {
        let (w, h) = self.magnitude.dimensions();
        let x = col.round();
        let y = row.round();
        if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
            return 0.0;
        }
        self.magnitude.get_pixel(x as u32, y as u32)[0]
    }
}

/// Build the chain. Blur scale tracks the minimum search radius so
/// fine sediment texture does not dominate the edge maps.
pub fn gradient_chain(gray8: &GrayImage, min_radius_px: f32) -> GradientChain {
    let sigma = (min_radius_px / 8.0).clamp(0.8, 3.0);
    let smoothed = gaussian_blur_f32(gray8, sigma);

    let sx = horizontal_scharr(&smoothed);
    let sy = vertical_scharr(&smoothed);

    let (w, h) = gray8.dimensions();
    let mut dx = GrayF32::new(w, h);
    let mut dy = GrayF32::new(w, h);
    let mut magnitude = GrayF32::new(w, h);
    let mut orientation = GrayF32::new(w, h);
    let mut max_magnitude = 0.0f32;

    for y in 0..h {
        for x in 0..w {
            let gx = sx.get_pixel(x, y)[0] as f32;
            let gy = sy.get_pixel(x, y)[0] as f32;
            let mag = (gx * gx + gy * gy).sqrt();
            if mag > max_magnitude {
                max_magnitude = mag;
            }
            dx.put_pixel(x, y, image::Luma([gx]));
            dy.put_pixel(x, y, image::Luma([gy]));
            magnitude.put_pixel(x, y, image::Luma([mag]));
            orientation.put_pixel(x, y, image::Luma([gy.atan2(gx)]));
        }
    }

    // Stability: keep only edges that survive a doubled threshold.
    let permissive = canny(&smoothed, 20.0, 50.0);
    let strict = canny(&smoothed, 40.0, 100.0);
    let mut stable_edges = GrayImage::new(w, h);
    for (out, (p, s)) in stable_edges
        .pixels_mut()
        .zip(permissive.pixels().zip(strict.pixels()))
    {
        out[0] = if p[0] > 0 && s[0] > 0 { 255 } else { 0 };
    }

    GradientChain {
        dx,
        dy,
        magnitude,
        orientation,
        stable_edges,
        max_magnitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_step(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                image::Luma([30])
            } else {
                image::Luma([220])
            }
        })
    }

    #[test]
    fn step_edge_has_horizontal_gradient() {
        let img = vertical_step(64, 64);
        let chain = gradient_chain(&img, 8.0);
        let mid = chain.magnitude_at(32.0, 32.0);
        let flat = chain.magnitude_at(8.0, 32.0);
        assert!(mid > flat, "edge magnitude {mid} should exceed flat {flat}");
        assert!(chain.max_magnitude > 0.0);
    }

    #[test]
    fn stable_edges_sit_on_the_step() {
        let img = vertical_step(64, 64);
        let chain = gradient_chain(&img, 8.0);
        let on_edge: u32 = (0..64u32)
            .map(|y| {
                (30..35u32)
                    .map(|x| u32::from(chain.stable_edges.get_pixel(x, y)[0] > 0))
                    .sum::<u32>()
            })
            .sum();
        assert!(on_edge > 32, "expected stable edge pixels along the step, got {on_edge}");
    }

    #[test]
    fn out_of_bounds_magnitude_is_zero() {
        let img = vertical_step(16, 16);
        let chain = gradient_chain(&img, 8.0);
        assert_eq!(chain.magnitude_at(-1.0, 4.0), 0.0);
        assert_eq!(chain.magnitude_at(4.0, 99.0), 0.0);
    }
}
