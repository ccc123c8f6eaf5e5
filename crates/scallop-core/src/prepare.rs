//! Working representations derived from one input image.
//!
//! Every downstream stage reads these buffers; all of them are value
//! owned and dropped when the per-image call returns, on every path.

use image::{imageops, imageops::FilterType, GrayImage, Rgb32FImage, RgbImage};
use tracing::debug;

use crate::colorbank::{ColorBank, ColorResponse};
use crate::GrayF32;

/// Working resolution is chosen so the smallest expected organism spans
/// about this many pixels of radius.
pub const TARGET_PIXELS_FOR_MIN_RADIUS: f32 = 16.0;

/// Only downscale when it saves a meaningful amount of work.
pub const DOWNSCALE_TRIGGER: f32 = 0.95;

/// CIE-Lab planes of the working image.
#[derive(Debug)]
pub struct LabPlanes {
    pub l: GrayF32,
    pub a: GrayF32,
    pub b: GrayF32,
}

/// All per-image buffers required by proposal generation, feature
/// extraction and classification.
#[derive(Debug)]
pub struct PreparedImage {
    pub rgb32f: Rgb32FImage,
    pub rgb8: RgbImage,
    pub gray32f: GrayF32,
    pub gray8: GrayImage,
    pub lab: LabPlanes,
    pub color: ColorResponse,
    pub width: u32,
    pub height: u32,
    /// Scale applied to reach working resolution; 1.0 when not resized.
    /// Output geometry is divided by this before emission.
    pub resize_factor: f32,
    /// Radius bounds at working resolution.
    pub min_radius_px: f32,
    pub max_radius_px: f32,
}

/// Derive every working representation for one image.
///
/// `min/max_radius_px` are the bounds at input resolution; they are
/// rescaled together with the image when a downscale triggers.
pub fn prepare(
    input: &RgbImage,
    bank: &ColorBank,
    min_radius_px: f32,
    max_radius_px: f32,
    left_half_only: bool,
) -> PreparedImage {
    let mut working: RgbImage;

    if left_half_only {
        let half = input.width() / 2;
        working = imageops::crop_imm(input, 0, 0, half.max(1), input.height()).to_image();
    } else {
        working = input.clone();
    }

    let mut min_r = min_radius_px;
    let mut max_r = max_radius_px;
    let mut resize_factor = TARGET_PIXELS_FOR_MIN_RADIUS / min_radius_px;

    if resize_factor < DOWNSCALE_TRIGGER {
        let nw = ((working.width() as f32 * resize_factor) as u32).max(2);
        let nh = ((working.height() as f32 * resize_factor) as u32).max(2);
        debug!(
            "prepare: downscale {}x{} -> {}x{} (factor {:.3})",
            working.width(),
            working.height(),
            nw,
            nh,
            resize_factor
        );
        working = imageops::resize(&working, nw, nh, FilterType::Triangle);
        min_r *= resize_factor;
        max_r *= resize_factor;
    } else {
        resize_factor = 1.0;
    }

    let (w, h) = working.dimensions();

    let mut rgb32f = Rgb32FImage::new(w, h);
    let mut gray32f = GrayF32::new(w, h);
    let mut gray8 = GrayImage::new(w, h);
    for (x, y, px) in working.enumerate_pixels() {
        let r = px[0] as f32 / 255.0;
        let g = px[1] as f32 / 255.0;
        let b = px[2] as f32 / 255.0;
        rgb32f.put_pixel(x, y, image::Rgb([r, g, b]));
        let gs = 0.299 * r + 0.587 * g + 0.114 * b;
        gray32f.put_pixel(x, y, image::Luma([gs]));
        gray8.put_pixel(x, y, image::Luma([(gs * 255.0).round().clamp(0.0, 255.0) as u8]));
    }

    let lab = rgb_to_lab(&working);
    let color = bank.classify(&lab, min_r, max_r);

    PreparedImage {
        rgb32f,
        rgb8: working,
        gray32f,
        gray8,
        lab,
        color,
        width: w,
        height: h,
        resize_factor,
        min_radius_px: min_r,
        max_radius_px: max_r,
    }
}

/// sRGB -> CIE-Lab, D65 white point.
pub fn rgb_to_lab(img: &RgbImage) -> LabPlanes {
    let (w, h) = img.dimensions();
    let mut l_plane = GrayF32::new(w, h);
    let mut a_plane = GrayF32::new(w, h);
    let mut b_plane = GrayF32::new(w, h);

    for (x, y, px) in img.enumerate_pixels() {
        let r = srgb_to_linear(px[0] as f32 / 255.0);
        let g = srgb_to_linear(px[1] as f32 / 255.0);
        let b = srgb_to_linear(px[2] as f32 / 255.0);

        let xn = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.95047;
        let yn = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        let zn = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.08883;

        let fx = lab_f(xn);
        let fy = lab_f(yn);
        let fz = lab_f(zn);

        l_plane.put_pixel(x, y, image::Luma([116.0 * fy - 16.0]));
        a_plane.put_pixel(x, y, image::Luma([500.0 * (fx - fy)]));
        b_plane.put_pixel(x, y, image::Luma([200.0 * (fy - fz)]));
    }

    LabPlanes {
        l: l_plane,
        a: a_plane,
        b: b_plane,
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_downscale_for_small_min_radius() {
        let img = RgbImage::new(64, 64);
        let prep = prepare(&img, &ColorBank::builtin(), 8.0, 24.0, false);
        assert_eq!(prep.resize_factor, 1.0);
        assert_eq!((prep.width, prep.height), (64, 64));
        assert_eq!(prep.min_radius_px, 8.0);
    }

    #[test]
    fn downscale_rescales_bounds_with_the_image() {
        let img = RgbImage::new(400, 300);
        let prep = prepare(&img, &ColorBank::builtin(), 64.0, 128.0, false);
        let expected = TARGET_PIXELS_FOR_MIN_RADIUS / 64.0;
        assert!((prep.resize_factor - expected).abs() < 1e-6);
        assert!((prep.min_radius_px - TARGET_PIXELS_FOR_MIN_RADIUS).abs() < 1e-3);
        assert_eq!(prep.width, (400.0 * expected) as u32);
    }

    #[test]
    fn left_half_crop_halves_the_width() {
        let img = RgbImage::new(200, 100);
        let prep = prepare(&img, &ColorBank::builtin(), 8.0, 24.0, true);
        assert_eq!((prep.width, prep.height), (100, 100));
    }

    #[test]
    fn white_is_high_l_neutral_ab() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]));
        let lab = rgb_to_lab(&img);
        let l = lab.l.get_pixel(0, 0)[0];
        let a = lab.a.get_pixel(0, 0)[0];
        let b = lab.b.get_pixel(0, 0)[0];
        assert!((l - 100.0).abs() < 1.0, "L = {l}");
        assert!(a.abs() < 1.0 && b.abs() < 1.0, "a = {a}, b = {b}");
    }
}
