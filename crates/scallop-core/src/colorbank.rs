//! Per-thread color filter bank.
//!
//! Each worker owns one bank. A bank is a small set of Lab-space color
//! filters; classifying an image produces per-pixel responses and the
//! saliency map every downstream proposal stage reads.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use imageproc::filter::gaussian_blur_f32;
use tracing::info;

use crate::prepare::LabPlanes;
use crate::{Category, GrayF32};

pub const COLORBANK_EXT: &str = "cfilt";

#[derive(Debug, Clone)]
pub struct ColorFilter {
    pub name: String,
    pub category: Category,
    /// Filter centroid in CIE-Lab.
    pub l: f32,
    pub a: f32,
    pub b: f32,
    /// Gaussian falloff of the color match, in Lab distance.
    pub sigma: f32,
    pub weight: f32,
}

impl ColorFilter {
    fn is_target(&self) -> bool {
        !matches!(self.category, Category::Other)
    }

    fn response(&self, l: f32, a: f32, b: f32) -> f32 {
        let dl = l - self.l;
        let da = a - self.a;
        let db = b - self.b;
        let d2 = dl * dl + da * da + db * db;
        self.weight * (-d2 / (2.0 * self.sigma * self.sigma)).exp()
    }
}

/// Color classification results for one image. Buffers are scoped to
/// the image-processing call and dropped with it.
#[derive(Debug)]
pub struct ColorResponse {
    /// Difference-of-Gaussian saliency over the target response.
    pub saliency: GrayF32,
    /// Best response over every filter in the bank.
    pub class_map: GrayF32,
    /// Best response over organism-directed filters only.
    pub target_map: GrayF32,
}

#[derive(Debug, Clone)]
pub struct ColorBank {
    filters: Vec<ColorFilter>,
}

impl ColorBank {
    /// Default bank used when no filter directory is configured:
    /// rough Lab centroids for the shell categories over sand.
    pub fn builtin() -> Self {
        ColorBank {
            filters: vec![
                ColorFilter {
                    name: "brown_shell".into(),
                    category: Category::BrownScallop,
                    l: 45.0,
                    a: 14.0,
                    b: 28.0,
                    sigma: 18.0,
                    weight: 1.0,
                },
                ColorFilter {
                    name: "white_shell".into(),
                    category: Category::WhiteScallop,
                    l: 82.0,
                    a: 2.0,
                    b: 8.0,
                    sigma: 14.0,
                    weight: 1.0,
                },
                ColorFilter {
                    name: "buried_rim".into(),
                    category: Category::BuriedScallop,
                    l: 52.0,
                    a: 10.0,
                    b: 20.0,
                    sigma: 12.0,
                    weight: 0.8,
                },
                ColorFilter {
                    name: "dollar_disc".into(),
                    category: Category::SandDollar,
                    l: 38.0,
                    a: 8.0,
                    b: 12.0,
                    sigma: 14.0,
                    weight: 0.9,
                },
                ColorFilter {
                    name: "sand".into(),
                    category: Category::Other,
                    l: 62.0,
                    a: 4.0,
                    b: 16.0,
                    sigma: 20.0,
                    weight: 0.6,
                },
            ],
        }
    }

    /// Load every `.cfilt` file under `dir`. Each non-comment line is
    /// `name category L a b sigma weight`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut filters = Vec::new();
        let entries =
            fs::read_dir(dir).with_context(|| format!("read colorbank dir {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COLORBANK_EXT) {
                continue;
            }
            let text = fs::read_to_string(&path)
                .with_context(|| format!("read color filter {}", path.display()))?;
            for (lineno, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let filter = parse_filter_line(line).with_context(|| {
                    format!("parse {} line {}", path.display(), lineno + 1)
                })?;
                filters.push(filter);
            }
        }

        anyhow::ensure!(!filters.is_empty(), "no color filters found in {}", dir.display());
        info!("colorbank: loaded {} filters from {}", filters.len(), dir.display());
        Ok(ColorBank { filters })
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Per-pixel color classification plus the saliency map. Blur scales
    /// follow the expected organism radius range.
    pub fn classify(&self, lab: &LabPlanes, min_radius_px: f32, max_radius_px: f32) -> ColorResponse {
        let (w, h) = lab.l.dimensions();
        let mut class_map = GrayF32::new(w, h);
        let mut target_map = GrayF32::new(w, h);

        for y in 0..h {
            for x in 0..w {
                let l = lab.l.get_pixel(x, y)[0];
                let a = lab.a.get_pixel(x, y)[0];
                let b = lab.b.get_pixel(x, y)[0];

                let mut best = 0.0f32;
                let mut best_target = 0.0f32;
                for f in &self.filters {
                    let r = f.response(l, a, b);
                    if r > best {
                        best = r;
                    }
                    if f.is_target() && r > best_target {
                        best_target = r;
                    }
                }
                class_map.put_pixel(x, y, image::Luma([best]));
                target_map.put_pixel(x, y, image::Luma([best_target]));
            }
        }

        let narrow = (min_radius_px * 0.5).max(0.8);
        let wide = max_radius_px.max(min_radius_px + 1.0);
        let fine = gaussian_blur_f32(&target_map, narrow);
        let coarse = gaussian_blur_f32(&target_map, wide);

        let mut saliency = GrayF32::new(w, h);
        let mut peak = 0.0f32;
        for (s, (f, c)) in saliency
            .pixels_mut()
            .zip(fine.pixels().zip(coarse.pixels()))
        {
            let v = (f[0] - c[0]).max(0.0);
            if v > peak {
                peak = v;
            }
            s[0] = v;
        }
        if peak > 0.0 {
            for s in saliency.pixels_mut() {
                s[0] /= peak;
            }
        }

        ColorResponse {
            saliency,
            class_map,
            target_map,
        }
    }
}

fn parse_filter_line(line: &str) -> Result<ColorFilter> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    anyhow::ensure!(fields.len() == 7, "expected 7 fields, got {}", fields.len());

    let category = Category::parse(fields[1])
        .with_context(|| format!("unknown category '{}'", fields[1]))?;

    Ok(ColorFilter {
        name: fields[0].to_string(),
        category,
        l: fields[2].parse().context("bad L value")?,
        a: fields[3].parse().context("bad a value")?,
        b: fields[4].parse().context("bad b value")?,
        sigma: fields[5].parse().context("bad sigma value")?,
        weight: fields[6].parse().context("bad weight value")?,
    })
}
