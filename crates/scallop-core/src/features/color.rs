//! Color statistics around each candidate.
//!
//! Lab means per quadrant and for the inner disk vs the surrounding
//! annulus, plus the color-bank response maps sampled the same way.

use crate::features::{window_in_bounds, COLOR_LEN, COLOR_OFFSET, WINDOW_FRAC};
use crate::prepare::PreparedImage;
use crate::Candidate;

struct RegionMean {
    sum: [f64; 3],
    n: u32,
}

impl RegionMean {
    fn new() -> Self {
        RegionMean { sum: [0.0; 3], n: 0 }
    }

    fn add(&mut self, l: f32, a: f32, b: f32) {
        self.sum[0] += l as f64;
        self.sum[1] += a as f64;
        self.sum[2] += b as f64;
        self.n += 1;
    }

    fn mean(&self, ch: usize) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            (self.sum[ch] / self.n as f64) as f32
        }
    }
}

pub fn color_features(prep: &PreparedImage, candidates: &mut [Candidate]) {
    for c in candidates.iter_mut() {
        if !window_in_bounds(c, prep.width, prep.height) {
            continue;
        }
        let r = c.radius();
        let half = (WINDOW_FRAC * r).ceil() as i32;
        let cx = c.col.round() as i32;
        let cy = c.row.round() as i32;

        // Quadrants of the inner disk, numbered counter-clockwise from
        // the +x/+y corner in image coordinates.
        let mut quads = [RegionMean::new(), RegionMean::new(), RegionMean::new(), RegionMean::new()];
        let mut inner = RegionMean::new();
        let mut outer = RegionMean::new();
        let (mut sal_in, mut sal_out) = (RegionMean::new(), RegionMean::new());
        let (mut cls_in, mut cls_out) = (RegionMean::new(), RegionMean::new());
        let (mut tgt_in, mut tgt_out) = (RegionMean::new(), RegionMean::new());

        for dy in -half..=half {
            for dx in -half..=half {
                let x = cx + dx;
                let y = cy + dy;
                if x < 0 || y < 0 || x >= prep.width as i32 || y >= prep.height as i32 {
                    continue;
                }
                let d = ((dx * dx + dy * dy) as f32).sqrt();
                if d > WINDOW_FRAC * r {
                    continue;
                }
                let (xu, yu) = (x as u32, y as u32);
                let l = prep.lab.l.get_pixel(xu, yu)[0];
                let a = prep.lab.a.get_pixel(xu, yu)[0];
                let b = prep.lab.b.get_pixel(xu, yu)[0];
                let sal = prep.color.saliency.get_pixel(xu, yu)[0];
                let cls = prep.color.class_map.get_pixel(xu, yu)[0];
                let tgt = prep.color.target_map.get_pixel(xu, yu)[0];

                if d <= r {
                    let q = match (dx >= 0, dy >= 0) {
                        (true, true) => 0,
                        (false, true) => 1,
                        (false, false) => 2,
                        (true, false) => 3,
                    };
                    quads[q].add(l, a, b);
                    inner.add(l, a, b);
                    sal_in.add(sal, 0.0, 0.0);
                    cls_in.add(cls, 0.0, 0.0);
                    tgt_in.add(tgt, 0.0, 0.0);
                } else {
                    outer.add(l, a, b);
                    sal_out.add(sal, 0.0, 0.0);
                    cls_out.add(cls, 0.0, 0.0);
                    tgt_out.add(tgt, 0.0, 0.0);
                }
            }
        }

        let Some(features) = c.features.as_mut() else {
            continue;
        };
        let seg = &mut features[COLOR_OFFSET..COLOR_OFFSET + COLOR_LEN];
        let mut k = 0;
        for quad in &quads {
            for ch in 0..3 {
                seg[k] = quad.mean(ch);
                k += 1;
            }
        }
        for ch in 0..3 {
            seg[k] = inner.mean(ch);
            k += 1;
        }
        for ch in 0..3 {
            seg[k] = outer.mean(ch);
            k += 1;
        }
        for ch in 0..3 {
            seg[k] = inner.mean(ch) - outer.mean(ch);
            k += 1;
        }
        seg[k] = sal_in.mean(0);
        seg[k + 1] = sal_out.mean(0);
        seg[k + 2] = cls_in.mean(0);
        seg[k + 3] = cls_out.mean(0);
        seg[k + 4] = tgt_in.mean(0);
        seg[k + 5] = tgt_out.mean(0);

        // Overall Lab contrast between the disk and its surroundings.
        let contrast = (0..3)
            .map(|ch| {
                let d = inner.mean(ch) - outer.mean(ch);
                d * d
            })
            .sum::<f32>()
            .sqrt();
        seg[k + 6] = contrast;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colorbank::ColorBank;
    use crate::features::FEATURE_LEN;
    use crate::prepare::prepare;
    use crate::Method;
    use image::RgbImage;

    fn prep_with_disk(disk: [u8; 3], bg: [u8; 3]) -> PreparedImage {
        let mut img = RgbImage::from_pixel(96, 96, image::Rgb(bg));
        for y in 0..96u32 {
            for x in 0..96u32 {
                if (x as f32 - 48.0).hypot(y as f32 - 48.0) < 12.0 {
                    img.put_pixel(x, y, image::Rgb(disk));
                }
            }
        }
        prepare(&img, &ColorBank::builtin(), 8.0, 24.0, false)
    }

    fn cand() -> Candidate {
        let mut c = Candidate::circle(48.0, 48.0, 12.0, 0.9, Method::Blob);
        c.features = Some(vec![0.0; FEATURE_LEN]);
        c
    }

    #[test]
    fn dark_disk_on_light_sand_has_negative_l_diff() {
        let prep = prep_with_disk([60, 40, 30], [170, 160, 140]);
        let mut cands = vec![cand()];
        color_features(&prep, &mut cands);
        let f = cands[0].features.as_ref().unwrap();
        // Inner-minus-outer L sits at index 18 of the segment.
        assert!(f[COLOR_OFFSET + 18] < -10.0);
        // Contrast is the last entry and must be positive.
        assert!(f[COLOR_OFFSET + COLOR_LEN - 1] > 10.0);
    }

    #[test]
    fn uniform_image_has_near_zero_contrast() {
        let prep = prep_with_disk([150, 140, 120], [150, 140, 120]);
        let mut cands = vec![cand()];
        color_features(&prep, &mut cands);
        let f = cands[0].features.as_ref().unwrap();
        assert!(f[COLOR_OFFSET + COLOR_LEN - 1].abs() < 1.0);
    }

    #[test]
    fn quadrants_agree_on_a_symmetric_disk() {
        let prep = prep_with_disk([120, 80, 50], [150, 140, 120]);
        let mut cands = vec![cand()];
        color_features(&prep, &mut cands);
        let f = cands[0].features.as_ref().unwrap();
        let l0 = f[COLOR_OFFSET];
        for q in 1..4 {
            assert!((f[COLOR_OFFSET + 3 * q] - l0).abs() < 2.0);
        }
    }
}
