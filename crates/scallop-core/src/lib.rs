pub mod colorbank;
pub mod consolidate;
pub mod features;
pub mod gradients;
pub mod imgprops;
pub mod postfilter;
pub mod prepare;
pub mod proposals;

use serde::{Deserialize, Serialize};

/// Single-channel float buffer shared by the saliency, gradient and
/// feature code paths.
pub type GrayF32 = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

pub const CATEGORY_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    BrownScallop,
    WhiteScallop,
    BuriedScallop,
    SandDollar,
    Other,
}

impl Category {
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::BrownScallop,
        Category::WhiteScallop,
        Category::BuriedScallop,
        Category::SandDollar,
        Category::Other,
    ];

    pub fn index(self) -> usize {
        match self {
            Category::BrownScallop => 0,
            Category::WhiteScallop => 1,
            Category::BuriedScallop => 2,
            Category::SandDollar => 3,
            Category::Other => 4,
        }
    }

    pub fn from_index(i: usize) -> Category {
        Category::ALL.get(i).copied().unwrap_or(Category::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::BrownScallop => "brown_scallop",
            Category::WhiteScallop => "white_scallop",
            Category::BuriedScallop => "buried_scallop",
            Category::SandDollar => "sand_dollar",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// One of the four independent proposal methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Blob,
    AdaptiveThreshold,
    Template,
    Edge,
}

impl Method {
    fn bit(self) -> u8 {
        match self {
            Method::Blob => 1 << 0,
            Method::AdaptiveThreshold => 1 << 1,
            Method::Template => 1 << 2,
            Method::Edge => 1 << 3,
        }
    }
}

/// Set of proposal methods that agreed on a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodSet(u8);

impl MethodSet {
    pub fn single(m: Method) -> Self {
        MethodSet(m.bit())
    }

    pub fn insert(&mut self, m: Method) {
        self.0 |= m.bit();
    }

    pub fn merge(&mut self, other: MethodSet) {
        self.0 |= other.0;
    }

    pub fn contains(self, m: Method) -> bool {
        self.0 & m.bit() != 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// An unclassified proposed region of interest. Owned by the per-image
/// processing call that created it.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Center row in working-resolution pixels.
    pub row: f32,
    /// Center column in working-resolution pixels.
    pub col: f32,
    /// Semi-major axis length in pixels.
    pub major: f32,
    /// Semi-minor axis length in pixels.
    pub minor: f32,
    /// Ellipse angle in degrees, counter-clockwise from the column axis.
    pub angle: f32,
    pub methods: MethodSet,
    /// Combined proposal confidence.
    pub magnitude: f32,
    /// Fixed-length feature vector, absent until extraction runs.
    pub features: Option<Vec<f32>>,
    /// Raw per-category classifier scores.
    pub class_scores: [f32; CATEGORY_COUNT],
    pub label: Option<Category>,
}

impl Candidate {
    pub fn circle(row: f32, col: f32, radius: f32, magnitude: f32, method: Method) -> Self {
        Candidate {
            row,
            col,
            major: radius,
            minor: radius,
            angle: 0.0,
            methods: MethodSet::single(method),
            magnitude,
            features: None,
            class_scores: [0.0; CATEGORY_COUNT],
            label: None,
        }
    }

    /// Effective search radius, used for all size filtering.
    pub fn radius(&self) -> f32 {
        self.major.max(self.minor)
    }

    pub fn center_distance(&self, other: &Candidate) -> f32 {
        let dr = self.row - other.row;
        let dc = self.col - other.col;
        (dr * dr + dc * dc).sqrt()
    }

    /// True when `other`'s ellipse lies wholly inside this one.
    pub fn contains(&self, other: &Candidate) -> bool {
        self.center_distance(other) + other.radius() <= self.radius() + 1.0
    }
}

/// A candidate confirmed positive with a resolved category. Geometry is
/// always in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub category: Category,
    pub row: f32,
    pub col: f32,
    pub angle: f32,
    pub major: f32,
    pub minor: f32,
    pub class_scores: [f32; CATEGORY_COUNT],
}
