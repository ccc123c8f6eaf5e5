//! Physical scale estimation from camera metadata.
//!
//! A pinhole ground-footprint estimate turns altitude/pitch/roll/focal
//! length into meters-per-pixel. Without metadata all size bounds are
//! treated as already being in pixels.

const MAX_TILT_DEG: f32 = 85.0;

/// Per-image physical scale. Created once per image, read-only afterward.
#[derive(Debug, Clone, Copy)]
pub struct ImageProperties {
    avg_pixel_size_m: f32,
    width_m: f32,
    height_m: f32,
    has_metadata: bool,
}

impl ImageProperties {
    /// No usable metadata: all downstream bounds stay in pixel units.
    pub fn without_metadata(width: u32, height: u32) -> Self {
        ImageProperties {
            avg_pixel_size_m: 1.0,
            width_m: width as f32,
            height_m: height as f32,
            has_metadata: false,
        }
    }

    /// Ground footprint from a tilted pinhole camera. Returns `None` when
    /// the supplied metadata cannot produce a sane scale.
    pub fn with_metadata(
        width: u32,
        height: u32,
        altitude_m: f32,
        pitch_deg: f32,
        roll_deg: f32,
        focal_length_px: f32,
    ) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        if !altitude_m.is_finite() || altitude_m <= 0.0 {
            return None;
        }
        if !focal_length_px.is_finite() || focal_length_px <= 0.0 {
            return None;
        }
        if pitch_deg.abs() >= MAX_TILT_DEG || roll_deg.abs() >= MAX_TILT_DEG {
            return None;
        }

        // Slant range along the optical axis grows with tilt.
        let tilt = pitch_deg.to_radians().cos() * roll_deg.to_radians().cos();
        let range_m = altitude_m / tilt;

        let width_m = range_m * width as f32 / focal_length_px;
        let height_m = range_m * height as f32 / focal_length_px;
        let avg_pixel_size_m = ((width_m * height_m) / (width as f32 * height as f32)).sqrt();

        if !avg_pixel_size_m.is_finite() || avg_pixel_size_m <= 0.0 {
            return None;
        }

        Some(ImageProperties {
            avg_pixel_size_m,
            width_m,
            height_m,
            has_metadata: true,
        })
    }

    pub fn avg_pixel_size_m(&self) -> f32 {
        self.avg_pixel_size_m
    }

    pub fn width_m(&self) -> f32 {
        self.width_m
    }

    pub fn height_m(&self) -> f32 {
        self.height_m
    }

    pub fn area_m2(&self) -> f32 {
        self.width_m * self.height_m
    }

    pub fn has_metadata(&self) -> bool {
        self.has_metadata
    }

    /// Pick a search radius in pixels from the physical bound when
    /// metadata is usable and the bound is set, else from the pixel
    /// bound directly.
    pub fn search_radius_px(&self, meters: f32, pixels: f32) -> f32 {
        if self.has_metadata && meters > 0.0 {
            meters / self.avg_pixel_size_m
        } else {
            pixels
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_metadata_is_identity_scale() {
        let p = ImageProperties::without_metadata(640, 480);
        assert!(!p.has_metadata());
        assert_eq!(p.avg_pixel_size_m(), 1.0);
        assert_eq!(p.search_radius_px(0.05, 12.0), 12.0);
    }

    #[test]
    fn nadir_footprint_matches_pinhole() {
        // 2m altitude, 1000px focal length: 1px covers 2mm on the bottom.
        let p = ImageProperties::with_metadata(1000, 1000, 2.0, 0.0, 0.0, 1000.0).unwrap();
        assert!((p.avg_pixel_size_m() - 0.002).abs() < 1e-6);
        assert!((p.width_m() - 2.0).abs() < 1e-4);
        // 5cm physical radius -> 25px
        assert!((p.search_radius_px(0.05, 0.0) - 25.0).abs() < 1e-3);
        // An unset physical bound falls through to the pixel bound.
        assert_eq!(p.search_radius_px(0.0, 12.0), 12.0);
    }

    #[test]
    fn tilt_grows_the_footprint() {
        let flat = ImageProperties::with_metadata(800, 600, 3.0, 0.0, 0.0, 900.0).unwrap();
        let tilted = ImageProperties::with_metadata(800, 600, 3.0, 30.0, 0.0, 900.0).unwrap();
        assert!(tilted.avg_pixel_size_m() > flat.avg_pixel_size_m());
    }

    #[test]
    fn degenerate_metadata_is_rejected() {
        assert!(ImageProperties::with_metadata(800, 600, 0.0, 0.0, 0.0, 900.0).is_none());
        assert!(ImageProperties::with_metadata(800, 600, 3.0, 89.0, 0.0, 900.0).is_none());
        assert!(ImageProperties::with_metadata(800, 600, 3.0, 0.0, 0.0, -1.0).is_none());
        assert!(ImageProperties::with_metadata(0, 600, 3.0, 0.0, 0.0, 900.0).is_none());
    }
}
