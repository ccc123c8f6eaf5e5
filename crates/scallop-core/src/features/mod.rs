//! Multi-stage feature extraction.
//!
//! One fixed-length vector per candidate. Stages run strictly in order
//! because later stages read quantities established by earlier ones
//! (refined boundary, quadrant partition). A candidate whose local
//! window falls outside the image is skipped for that stage only; its
//! segment stays zeroed.

pub mod color;
pub mod gabor;
pub mod hog;
pub mod shape;
pub mod size;

use crate::gradients::GradientChain;
use crate::imgprops::ImageProperties;
use crate::prepare::PreparedImage;
use crate::Candidate;

pub const SHAPE_LEN: usize = 10;
pub const HOG_LEN: usize = 24;
pub const SIZE_LEN: usize = 6;
pub const COLOR_LEN: usize = 28;
pub const GABOR_LEN: usize = 12;

pub const SHAPE_OFFSET: usize = 0;
pub const HOG_GRAY_OFFSET: usize = SHAPE_OFFSET + SHAPE_LEN;
pub const HOG_SAL_OFFSET: usize = HOG_GRAY_OFFSET + HOG_LEN;
pub const SIZE_OFFSET: usize = HOG_SAL_OFFSET + HOG_LEN;
pub const COLOR_OFFSET: usize = SIZE_OFFSET + SIZE_LEN;
pub const GABOR_OFFSET: usize = COLOR_OFFSET + COLOR_LEN;
pub const FEATURE_LEN: usize = GABOR_OFFSET + GABOR_LEN;

/// Unit compensation applied to size features when no physical scale is
/// available, keeping them comparable across metadata/non-metadata runs.
pub const SIZE_ADJ_NO_METADATA: f32 = 0.0008;

/// Window multiplier shared by every local stage.
pub(crate) const WINDOW_FRAC: f32 = 1.5;

/// True when the candidate's local window fits inside the image.
pub(crate) fn window_in_bounds(c: &Candidate, width: u32, height: u32) -> bool {
    let half = WINDOW_FRAC * c.radius();
    c.col - half >= 0.0
        && c.row - half >= 0.0
        && c.col + half < width as f32
        && c.row + half < height as f32
}

/// Run every stage over the candidate set, in order.
pub fn extract_features(
    prep: &PreparedImage,
    chain: &GradientChain,
    props: &ImageProperties,
    candidates: &mut [Candidate],
) {
    for c in candidates.iter_mut() {
        c.features = Some(vec![0.0; FEATURE_LEN]);
    }

    shape::edge_search(chain, candidates);
    hog::generate(&prep.gray32f, candidates, HOG_GRAY_OFFSET);
    hog::generate(&prep.color.saliency, candidates, HOG_SAL_OFFSET);

    let size_adj = if props.has_metadata() {
        1.0
    } else {
        SIZE_ADJ_NO_METADATA
    };
    for c in candidates.iter_mut() {
        size::size_features(c, props, prep.resize_factor, size_adj);
    }

    color::color_features(prep, candidates);
    gabor::gabor_features(&prep.gray32f, candidates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colorbank::ColorBank;
    use crate::gradients::gradient_chain;
    use crate::prepare::prepare;
    use crate::{Candidate, Method};
    use image::RgbImage;

    fn prep_disk() -> PreparedImage {
        let mut img = RgbImage::from_pixel(128, 128, image::Rgb([150, 140, 120]));
        for y in 0..128u32 {
            for x in 0..128u32 {
                let d = (x as f32 - 64.0).hypot(y as f32 - 64.0);
                if d < 12.0 {
                    img.put_pixel(x, y, image::Rgb([120, 80, 50]));
                }
            }
        }
        prepare(&img, &ColorBank::builtin(), 8.0, 24.0, false)
    }

    #[test]
    fn feature_length_is_constant_across_candidates() {
        let prep = prep_disk();
        let chain = gradient_chain(&prep.gray8, prep.min_radius_px);
        let props = crate::imgprops::ImageProperties::without_metadata(128, 128);

        let mut cands = vec![
            Candidate::circle(64.0, 64.0, 12.0, 0.9, Method::Blob),
            Candidate::circle(40.0, 40.0, 9.0, 0.5, Method::Edge),
            Candidate::circle(90.0, 30.0, 15.0, 0.4, Method::Template),
        ];
        extract_features(&prep, &chain, &props, &mut cands);

        for c in &cands {
            assert_eq!(c.features.as_ref().unwrap().len(), FEATURE_LEN);
        }
    }

    #[test]
    fn out_of_bounds_window_leaves_local_segments_zeroed() {
        let prep = prep_disk();
        let chain = gradient_chain(&prep.gray8, prep.min_radius_px);
        let props = crate::imgprops::ImageProperties::without_metadata(128, 128);

        // Window pokes out of the top-left corner.
        let mut cands = vec![Candidate::circle(4.0, 4.0, 10.0, 0.5, Method::Blob)];
        extract_features(&prep, &chain, &props, &mut cands);

        let f = cands[0].features.as_ref().unwrap();
        assert!(f[HOG_GRAY_OFFSET..HOG_GRAY_OFFSET + HOG_LEN].iter().all(|&v| v == 0.0));
        assert!(f[COLOR_OFFSET..COLOR_OFFSET + COLOR_LEN].iter().all(|&v| v == 0.0));
        // Size features do not depend on the window and still populate.
        assert!(f[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn on_disk_candidate_gets_nonzero_shape_and_color() {
        let prep = prep_disk();
        let chain = gradient_chain(&prep.gray8, prep.min_radius_px);
        let props = crate::imgprops::ImageProperties::without_metadata(128, 128);

        let mut cands = vec![Candidate::circle(64.0, 64.0, 12.0, 0.9, Method::Blob)];
        extract_features(&prep, &chain, &props, &mut cands);

        let f = cands[0].features.as_ref().unwrap();
        assert!(f[SHAPE_OFFSET..SHAPE_OFFSET + SHAPE_LEN].iter().any(|&v| v != 0.0));
        assert!(f[COLOR_OFFSET..COLOR_OFFSET + COLOR_LEN].iter().any(|&v| v != 0.0));
        assert!(f[GABOR_OFFSET..GABOR_OFFSET + GABOR_LEN].iter().any(|&v| v != 0.0));
    }
}
