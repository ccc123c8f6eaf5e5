//! Candidate proposal generators.
//!
//! Four independent methods with different failure modes. Each returns
//! an unordered candidate set; an empty set is valid output. Size
//! filtering happens afterwards in [`crate::consolidate`].

pub mod adaptive;
pub mod blob;
pub mod edges;
pub mod template;

use crate::GrayF32;

/// Connected components over nonzero pixels, 8-connectivity.
pub(crate) fn components(mask: &image::GrayImage, max_components: usize) -> Vec<Vec<(u32, u32)>> {
    let (w, h) = mask.dimensions();
    let mut seen = vec![false; (w * h) as usize];
    let mut out = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if seen[idx] || mask.get_pixel(x, y)[0] == 0 {
                continue;
            }

            let mut comp = Vec::new();
            let mut stack = vec![(x, y)];
            seen[idx] = true;
            while let Some((cx, cy)) = stack.pop() {
                comp.push((cx, cy));
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx as i32 + dx;
                        let ny = cy as i32 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                            continue;
                        }
                        let (nx, ny) = (nx as u32, ny as u32);
                        let nidx = (ny * w + nx) as usize;
                        if !seen[nidx] && mask.get_pixel(nx, ny)[0] != 0 {
                            seen[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
            out.push(comp);
            if out.len() >= max_components {
                return out;
            }
        }
    }
    out
}

/// Ellipse parameters from the second central moments of a pixel set:
/// (row, col, semi-major, semi-minor, angle in degrees).
pub(crate) fn ellipse_from_points(points: &[(u32, u32)]) -> Option<(f32, f32, f32, f32, f32)> {
    if points.len() < 5 {
        return None;
    }
    let n = points.len() as f32;
    let (mut mx, mut my) = (0.0f32, 0.0f32);
    for &(x, y) in points {
        mx += x as f32;
        my += y as f32;
    }
    mx /= n;
    my /= n;

    let (mut cxx, mut cxy, mut cyy) = (0.0f32, 0.0f32, 0.0f32);
    for &(x, y) in points {
        let dx = x as f32 - mx;
        let dy = y as f32 - my;
        cxx += dx * dx;
        cxy += dx * dy;
        cyy += dy * dy;
    }
    cxx /= n;
    cxy /= n;
    cyy /= n;

    let tr = cxx + cyy;
    let det = cxx * cyy - cxy * cxy;
    let disc = (tr * tr / 4.0 - det).max(0.0).sqrt();
    let l1 = tr / 2.0 + disc;
    let l2 = (tr / 2.0 - disc).max(0.0);

    // For a filled disk of radius R the leading moment is R^2/4.
    let major = 2.0 * l1.sqrt();
    let minor = 2.0 * l2.sqrt();
    if major <= 0.0 {
        return None;
    }
    let angle = 0.5 * (2.0 * cxy).atan2(cxx - cyy);

    Some((my, mx, major, minor.max(1.0), angle.to_degrees()))
}

/// Peaks of `map` above `threshold`, suppressing anything weaker within
/// `radius`. Returns (x, y, value) sorted by value descending.
pub(crate) fn local_maxima(map: &GrayF32, radius: f32, threshold: f32) -> Vec<(u32, u32, f32)> {
    let (w, h) = map.dimensions();
    let r = radius.ceil().max(1.0) as i32;
    let r2 = radius * radius;
    let mut peaks = Vec::new();

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let v = map.get_pixel(x as u32, y as u32)[0];
            if v < threshold {
                continue;
            }
            let mut is_max = true;
            'scan: for dy in -r..=r {
                for dx in -r..=r {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    if (dx * dx + dy * dy) as f32 > r2 {
                        continue;
                    }
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let nv = map.get_pixel(nx as u32, ny as u32)[0];
                    if nv > v || (nv == v && (ny, nx) < (y, x)) {
                        is_max = false;
                        break 'scan;
                    }
                }
            }
            if is_max {
                peaks.push((x as u32, y as u32, v));
            }
        }
    }

    peaks.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moments_recover_a_disk() {
        let mut pts = Vec::new();
        for y in 0..60u32 {
            for x in 0..60u32 {
                let dx = x as f32 - 30.0;
                let dy = y as f32 - 30.0;
                if dx * dx + dy * dy <= 100.0 {
                    pts.push((x, y));
                }
            }
        }
        let (row, col, major, minor, _) = ellipse_from_points(&pts).unwrap();
        assert!((row - 30.0).abs() < 0.5 && (col - 30.0).abs() < 0.5);
        assert!((major - 10.0).abs() < 1.0, "major = {major}");
        assert!((minor - 10.0).abs() < 1.0, "minor = {minor}");
    }

    #[test]
    fn components_split_disjoint_regions() {
        let mut mask = image::GrayImage::new(40, 20);
        for x in 2..8 {
            mask.put_pixel(x, 5, image::Luma([255]));
        }
        for x in 20..30 {
            mask.put_pixel(x, 12, image::Luma([255]));
        }
        let comps = components(&mask, 100);
        assert_eq!(comps.len(), 2);
    }

    #[test]
    fn local_maxima_respects_suppression_radius() {
        let mut map = GrayF32::new(32, 32);
        map.put_pixel(10, 10, image::Luma([1.0]));
        map.put_pixel(12, 10, image::Luma([0.8])); // inside radius, weaker
        map.put_pixel(25, 25, image::Luma([0.9]));
        let peaks = local_maxima(&map, 4.0, 0.5);
        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].0, peaks[0].1), (10, 10));
    }
}
