//! Circle proposals from the stable edge map.
//!
//! Connected edge chains are fitted with a least-squares circle; chains
//! whose pixels sit tightly on the fitted circle become candidates.

use crate::gradients::GradientChain;
use crate::proposals::components;
use crate::{Candidate, Method};

const MIN_CHAIN_LEN: usize = 12;
const MAX_CHAINS: usize = 1024;
const MAX_RESIDUAL_FRAC: f32 = 0.2;

pub fn stable_edge_candidates(
    chain: &GradientChain,
    min_radius_px: f32,
    max_radius_px: f32,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for edge_chain in components(&chain.stable_edges, MAX_CHAINS) {
        if edge_chain.len() < MIN_CHAIN_LEN {
            continue;
        }
        let Some((cx, cy, r)) = fit_circle(&edge_chain) else {
            continue;
        };
        // Loose pre-filter; the hard bound is applied during consolidation.
        if r < 0.5 * min_radius_px || r > 2.0 * max_radius_px {
            continue;
        }

        let max_residual = MAX_RESIDUAL_FRAC * r;
        let mut residual_sum = 0.0f32;
        for &(x, y) in &edge_chain {
            let d = ((x as f32 - cx).hypot(y as f32 - cy) - r).abs();
            residual_sum += d;
        }
        let mean_residual = residual_sum / edge_chain.len() as f32;
        if mean_residual > max_residual {
            continue;
        }

        let coverage =
            (edge_chain.len() as f32 / (2.0 * std::f32::consts::PI * r)).min(1.0);
        let magnitude = coverage * (1.0 - mean_residual / max_residual);
        if magnitude <= 0.0 {
            continue;
        }

        out.push(Candidate::circle(cy, cx, r, magnitude, Method::Edge));
    }
    out
}

/// Kasa algebraic circle fit: minimize |x^2 + y^2 + a x + b y + c|.
fn fit_circle(points: &[(u32, u32)]) -> Option<(f32, f32, f32)> {
    let n = points.len() as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0f64, 0.0, 0.0, 0.0, 0.0);
    let (mut sxz, mut syz, mut sz) = (0.0f64, 0.0, 0.0);

    for &(xi, yi) in points {
        let x = xi as f64;
        let y = yi as f64;
        let z = x * x + y * y;
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
        sxz += x * z;
        syz += y * z;
        sz += z;
    }

    // Normal equations for [a b c].
    let m = [
        [sxx, sxy, sx],
        [sxy, syy, sy],
        [sx, sy, n],
    ];
    let rhs = [-sxz, -syz, -sz];
    let sol = solve3(m, rhs)?;
    let (a, b, c) = (sol[0], sol[1], sol[2]);

    let cx = -a / 2.0;
    let cy = -b / 2.0;
    let r2 = cx * cx + cy * cy - c;
    if r2 <= 0.0 || !r2.is_finite() {
        return None;
    }
    Some((cx as f32, cy as f32, r2.sqrt() as f32))
}

fn solve3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-9 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in 0..3 {
            if row == col {
                continue;
            }
            let f = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= f * m[col][k];
            }
            rhs[row] -= f * rhs[col];
        }
    }
    Some([rhs[0] / m[0][0], rhs[1] / m[1][1], rhs[2] / m[2][2]])
}
