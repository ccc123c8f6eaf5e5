//! Ground-truth annotation lists.
//!
//! One annotation per line: `image,category,row,col,major,minor,angle`.
//! Geometry is in original-image pixels; callers scale to the working
//! resolution before matching.

use anyhow::{ensure, Context, Result};
use tracing::info;

use scallop_core::{Candidate, Category, Method};

#[derive(Debug, Clone)]
pub struct GtEntry {
    pub image: String,
    pub category: Category,
    pub row: f32,
    pub col: f32,
    pub major: f32,
    pub minor: f32,
    pub angle: f32,
}

#[derive(Debug, Default)]
pub struct GroundTruthList {
    entries: Vec<GtEntry>,
}

impl GroundTruthList {
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read ground truth list: {path}"))?;
        let list = Self::from_text(&text)?;
        info!("training: loaded {} annotations from {}", list.entries.len(), path);
        Ok(list)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            ensure!(
                fields.len() == 7,
                "line {}: expected 7 comma-separated fields, got {}",
                lineno + 1,
                fields.len()
            );
            let category = Category::parse(fields[1])
                .with_context(|| format!("line {}: unknown category {}", lineno + 1, fields[1]))?;
            let num = |i: usize, what: &str| -> Result<f32> {
                fields[i]
                    .parse::<f32>()
                    .with_context(|| format!("line {}: bad {what}", lineno + 1))
            };
            entries.push(GtEntry {
                image: fields[0].to_string(),
                category,
                row: num(2, "row")?,
                col: num(3, "col")?,
                major: num(4, "major")?,
                minor: num(5, "minor")?,
                angle: num(6, "angle")?,
            });
        }
        Ok(GroundTruthList { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn for_image<'a>(&'a self, image: &'a str) -> impl Iterator<Item = &'a GtEntry> + 'a {
        self.entries.iter().filter(move |e| e.image == image)
    }

    /// Annotations for one image as labelled candidates at working
    /// resolution.
    pub fn to_candidates(&self, image: &str, resize_factor: f32) -> Vec<Candidate> {
        self.for_image(image)
            .map(|e| {
                let mut c = Candidate::circle(
                    e.row * resize_factor,
                    e.col * resize_factor,
                    e.major * resize_factor,
                    1.0,
                    Method::Blob,
                );
                c.minor = e.minor * resize_factor;
                c.angle = e.angle;
                c.label = Some(e.category);
                c
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
# survey leg 3
img_001.jpg,brown_scallop,120.5,340.0,22.0,20.0,15.0
img_001.jpg,sand_dollar,400.0,80.0,12.0,12.0,0.0
img_002.jpg,white_scallop,60.0,60.0,18.0,16.0,90.0
";

    #[test]
    fn parses_and_groups_by_image() {
        let list = GroundTruthList::from_text(LIST).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.for_image("img_001.jpg").count(), 2);
        assert_eq!(list.for_image("img_003.jpg").count(), 0);
    }

    #[test]
    fn image_filter_iterates_lazily_over_the_borrowed_list() {
        let list = GroundTruthList::from_text(LIST).unwrap();
        let key = String::from("img_001.jpg");
        let mut matches = list.for_image(&key);
        assert_eq!(matches.next().map(|e| e.category), Some(Category::BrownScallop));
        assert_eq!(matches.next().map(|e| e.category), Some(Category::SandDollar));
        assert!(matches.next().is_none());
    }

    #[test]
    fn candidates_scale_with_the_resize_factor() {
        let list = GroundTruthList::from_text(LIST).unwrap();
        let cands = list.to_candidates("img_002.jpg", 0.5);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].row, 30.0);
        assert_eq!(cands[0].major, 9.0);
        assert_eq!(cands[0].label, Some(Category::WhiteScallop));
        // Angle is scale-free.
        assert_eq!(cands[0].angle, 90.0);
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(GroundTruthList::from_text("img.jpg,brown_scallop,1,2,3").is_err());
        assert!(GroundTruthList::from_text("img.jpg,kraken,1,2,3,4,5").is_err());
        assert!(GroundTruthList::from_text("img.jpg,brown_scallop,x,2,3,4,5").is_err());
    }
}
