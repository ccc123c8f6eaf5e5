//! Candidate consolidation: size filtering, duplicate suppression and
//! priority ordering across the four proposal methods.

use tracing::debug;

use crate::Candidate;

/// Two candidates are duplicates when their centers sit within this
/// fraction of the larger radius and their radii are comparable.
pub const DUP_CENTER_FRAC: f32 = 0.5;
pub const DUP_RADIUS_RATIO: f32 = 1.6;

/// Drop every candidate outside the per-image radius bounds.
pub fn filter_candidates(candidates: &mut Vec<Candidate>, min_radius_px: f32, max_radius_px: f32) {
    candidates.retain(|c| {
        let r = c.radius();
        r >= min_radius_px && r <= max_radius_px
    });
}

pub fn is_duplicate(a: &Candidate, b: &Candidate) -> bool {
    let ra = a.radius();
    let rb = b.radius();
    let larger = ra.max(rb);
    let ratio = larger / ra.min(rb).max(1e-3);
    a.center_distance(b) < DUP_CENTER_FRAC * larger && ratio < DUP_RADIUS_RATIO
}

/// Explicit priority order over the merged set: combined confidence
/// descending, ties broken by method agreement, then by larger radius.
/// Interactive training walks candidates in this order.
#[derive(Debug, Clone)]
pub struct CandidateRanking(Vec<usize>);

impl CandidateRanking {
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn iter<'a>(&'a self, merged: &'a [Candidate]) -> impl Iterator<Item = &'a Candidate> {
        self.0.iter().map(move |&i| &merged[i])
    }
}

/// Merge the filtered generator outputs into one de-duplicated set plus
/// its priority ordering. Insertion order of the input sets does not
/// affect which representatives survive; stronger candidates always
/// absorb weaker duplicates.
pub fn consolidate(sets: Vec<Vec<Candidate>>) -> (Vec<Candidate>, CandidateRanking) {
    let total: usize = sets.iter().map(|s| s.len()).sum();
    let mut pool: Vec<Candidate> = sets.into_iter().flatten().collect();
    pool.sort_by(|a, b| {
        b.magnitude
            .partial_cmp(&a.magnitude)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged: Vec<Candidate> = Vec::new();
    for cand in pool {
        match merged.iter_mut().find(|kept| is_duplicate(kept, &cand)) {
            Some(kept) => {
                kept.methods.merge(cand.methods);
                kept.magnitude = kept.magnitude.max(cand.magnitude);
            }
            None => merged.push(cand),
        }
    }

    let mut order: Vec<usize> = (0..merged.len()).collect();
    order.sort_by(|&a, &b| {
        let ca = &merged[a];
        let cb = &merged[b];
        cb.magnitude
            .partial_cmp(&ca.magnitude)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| cb.methods.count().cmp(&ca.methods.count()))
            .then_with(|| {
                cb.radius()
                    .partial_cmp(&ca.radius())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    debug!("consolidate: {} proposals -> {} candidates", total, merged.len());
    (merged, CandidateRanking(order))
}

/// Remove candidates whose ellipse crosses the image border.
pub fn remove_border_candidates(candidates: &mut Vec<Candidate>, width: u32, height: u32) {
    candidates.retain(|c| {
        let r = c.radius();
        c.col - r >= 0.0
            && c.row - r >= 0.0
            && c.col + r < width as f32
            && c.row + r < height as f32
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn cand(row: f32, col: f32, r: f32, mag: f32, m: Method) -> Candidate {
        Candidate::circle(row, col, r, mag, m)
    }

    #[test]
    fn radius_filter_enforces_bounds() {
        let mut cands = vec![
            cand(10.0, 10.0, 2.0, 0.5, Method::Blob),
            cand(20.0, 20.0, 8.0, 0.5, Method::Blob),
            cand(30.0, 30.0, 40.0, 0.5, Method::Blob),
        ];
        filter_candidates(&mut cands, 4.0, 20.0);
        assert_eq!(cands.len(), 1);
        assert!(cands.iter().all(|c| c.radius() >= 4.0 && c.radius() <= 20.0));
    }

    #[test]
    fn merged_count_never_exceeds_input_sum() {
        let sets = vec![
            vec![cand(50.0, 50.0, 10.0, 0.9, Method::Blob)],
            vec![cand(51.0, 50.5, 11.0, 0.6, Method::AdaptiveThreshold)],
            vec![cand(52.0, 49.0, 10.5, 0.7, Method::Template)],
            vec![cand(120.0, 120.0, 9.0, 0.8, Method::Edge)],
        ];
        let total: usize = sets.iter().map(|s| s.len()).sum();
        let (merged, _) = consolidate(sets);
        assert!(merged.len() <= total);
        assert_eq!(merged.len(), 2, "three near-duplicates should collapse to one");
    }

    #[test]
    fn no_retained_pair_is_a_duplicate() {
        let sets = vec![
            vec![
                cand(50.0, 50.0, 10.0, 0.9, Method::Blob),
                cand(53.0, 50.0, 10.0, 0.5, Method::Blob),
                cand(90.0, 90.0, 12.0, 0.4, Method::Blob),
            ],
            vec![cand(50.5, 51.0, 9.0, 0.7, Method::Edge)],
        ];
        let (merged, _) = consolidate(sets);
        for i in 0..merged.len() {
            for j in (i + 1)..merged.len() {
                assert!(!is_duplicate(&merged[i], &merged[j]));
            }
        }
    }

    #[test]
    fn representative_carries_method_agreement() {
        let sets = vec![
            vec![cand(50.0, 50.0, 10.0, 0.9, Method::Blob)],
            vec![cand(50.5, 50.5, 10.0, 0.4, Method::Template)],
        ];
        let (merged, _) = consolidate(sets);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].methods.contains(Method::Blob));
        assert!(merged[0].methods.contains(Method::Template));
        assert_eq!(merged[0].methods.count(), 2);
        assert!((merged[0].magnitude - 0.9).abs() < 1e-6);
    }

    #[test]
    fn ranking_breaks_ties_by_agreement_then_radius() {
        let sets = vec![vec![
            cand(10.0, 10.0, 8.0, 0.5, Method::Blob),
            cand(200.0, 200.0, 8.0, 0.5, Method::Template),
            cand(100.0, 100.0, 14.0, 0.5, Method::Edge),
        ]];
        let mut two_methods = cand(300.0, 300.0, 8.0, 0.5, Method::Blob);
        two_methods.methods.insert(Method::Edge);
        let (merged, ranking) = consolidate(vec![sets.into_iter().flatten().collect(), vec![two_methods]]);

        let ranked: Vec<&Candidate> = ranking.iter(&merged).collect();
        // Equal magnitude everywhere: agreement first, then radius.
        assert_eq!(ranked[0].methods.count(), 2);
        assert!((ranked[1].radius() - 14.0).abs() < 1e-6);
    }

    #[test]
    fn border_candidates_are_removed() {
        let mut cands = vec![
            cand(5.0, 5.0, 10.0, 0.5, Method::Blob),
            cand(50.0, 50.0, 10.0, 0.5, Method::Blob),
        ];
        remove_border_candidates(&mut cands, 100, 100);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].row, 50.0);
    }
}
