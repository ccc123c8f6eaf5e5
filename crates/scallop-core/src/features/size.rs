//! Physical size descriptor.

use crate::features::{SIZE_LEN, SIZE_OFFSET};
use crate::imgprops::ImageProperties;
use crate::Candidate;

/// Candidate axes live at working resolution; undo the downscale before
/// applying the physical scale so the descriptor is resolution-free.
pub fn size_features(
    c: &mut Candidate,
    props: &ImageProperties,
    resize_factor: f32,
    size_adj: f32,
) {
    let scale = props.avg_pixel_size_m() * size_adj / resize_factor.max(1e-6);
    let major_m = c.major * scale;
    let minor_m = c.minor * scale;
    let area_m2 = std::f32::consts::PI * major_m * minor_m;
    let aspect = c.minor / c.major.max(1e-6);
    let radius_m = c.radius() * scale;

    let Some(features) = c.features.as_mut() else {
        return;
    };
    let seg = &mut features[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN];
    seg[0] = major_m;
    seg[1] = minor_m;
    seg[2] = area_m2;
    seg[3] = aspect;
    seg[4] = radius_m;
    seg[5] = (area_m2.max(1e-12)).ln();
}
