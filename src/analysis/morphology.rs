// src/analysis/morphology.rs
//
// Morphology Analyzer: per-detection shape descriptors. Pure function of the
// current detection; nothing here looks at other frames.
//
//   - principal axis from second-order central moments
//   - long/short axis = pixel extent along / across that axis
//   - convex hull over pixel corners for solidity
//   - head/tail polarity by counting pixels in the two end caps

use crate::detection::Detection;
use crate::types::{BehaviorConfig, Pose};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MorphologyDescriptor {
    pub area_px: f64,
    /// Boundary pixels (a member pixel with a 4-neighbour outside the blob).
    pub perimeter_px: f64,
    pub long_axis_px: f64,
    pub short_axis_px: f64,
    /// long / short, >= 1
    pub aspect_ratio: f64,
    /// 1 - short / long, in [0, 1)
    pub elongation: f64,
    pub solidity: f64,
    /// Orientation of the long axis in image coordinates, degrees.
    pub body_axis_deg: f64,
    pub pose: Pose,
    /// Unit vector tail → head. None for BALL pose.
    pub head_axis: Option<(f64, f64)>,
}

pub struct MorphologyAnalyzer {
    ball_aspect_eps: f64,
    cap_depth: f64,
}

impl MorphologyAnalyzer {
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            ball_aspect_eps: config.ball_aspect_eps,
            cap_depth: config.num_cap_lines.max(1) as f64,
        }
    }

    pub fn analyze(&self, det: &Detection) -> MorphologyDescriptor {
        let n = det.pixels.len().max(1) as f64;
        let (cx, cy) = det.centroid;

        let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
        for &(x, y) in &det.pixels {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            mu20 += dx * dx;
            mu02 += dy * dy;
            mu11 += dx * dy;
        }
        mu20 /= n;
        mu02 /= n;
        mu11 /= n;

        let mut theta = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
        let mut extents = axis_extents(&det.pixels, det.centroid, theta);
        if extents.short() > extents.long() {
            theta += std::f64::consts::FRAC_PI_2;
            extents = axis_extents(&det.pixels, det.centroid, theta);
        }

        let long_axis = extents.long();
        let short_axis = extents.short();
        let aspect_ratio = long_axis / short_axis;
        let elongation = 1.0 - short_axis / long_axis;

        let pose = if (aspect_ratio - 1.0).abs() < self.ball_aspect_eps {
            Pose::Ball
        } else {
            Pose::Elongated
        };

        let head_axis = match pose {
            Pose::Ball => None,
            Pose::Elongated => Some(self.polarity(det, theta, &extents)),
        };

        let hull_area = convex_hull_area(&det.pixels);
        let solidity = if hull_area > 0.0 {
            (det.area as f64 / hull_area).min(1.0)
        } else {
            0.0
        };

        MorphologyDescriptor {
            area_px: det.area as f64,
            perimeter_px: boundary_pixels(det) as f64,
            long_axis_px: long_axis,
            short_axis_px: short_axis,
            aspect_ratio,
            elongation,
            solidity,
            body_axis_deg: normalize_axis_deg(theta.to_degrees()),
            pose,
            head_axis,
        }
    }

    /// The end cap holding more foreground is the head. Ties go to the
    /// positive end of the axis.
    fn polarity(&self, det: &Detection, theta: f64, ext: &AxisExtents) -> (f64, f64) {
        let (ux, uy) = (theta.cos(), theta.sin());
        let (cx, cy) = det.centroid;
        let mut positive_cap = 0usize;
        let mut negative_cap = 0usize;
        for &(x, y) in &det.pixels {
            let t = (x as f64 - cx) * ux + (y as f64 - cy) * uy;
            if t > ext.t_max - self.cap_depth {
                positive_cap += 1;
            }
            if t < ext.t_min + self.cap_depth {
                negative_cap += 1;
            }
        }
        if positive_cap >= negative_cap {
            (ux, uy)
        } else {
            (-ux, -uy)
        }
    }
}

struct AxisExtents {
    t_min: f64,
    t_max: f64,
    s_min: f64,
    s_max: f64,
}

impl AxisExtents {
    fn long(&self) -> f64 {
        self.t_max - self.t_min + 1.0
    }
    fn short(&self) -> f64 {
        self.s_max - self.s_min + 1.0
    }
}

fn axis_extents(pixels: &[(usize, usize)], centroid: (f64, f64), theta: f64) -> AxisExtents {
    let (ux, uy) = (theta.cos(), theta.sin());
    let mut ext = AxisExtents {
        t_min: f64::INFINITY,
        t_max: f64::NEG_INFINITY,
        s_min: f64::INFINITY,
        s_max: f64::NEG_INFINITY,
    };
    for &(x, y) in pixels {
        let dx = x as f64 - centroid.0;
        let dy = y as f64 - centroid.1;
        let t = dx * ux + dy * uy;
        let s = -dx * uy + dy * ux;
        ext.t_min = ext.t_min.min(t);
        ext.t_max = ext.t_max.max(t);
        ext.s_min = ext.s_min.min(s);
        ext.s_max = ext.s_max.max(s);
    }
    // rotation noise on axis-aligned shapes
    for v in [
        &mut ext.t_min,
        &mut ext.t_max,
        &mut ext.s_min,
        &mut ext.s_max,
    ] {
        *v = (*v * 1e9).round() / 1e9;
    }
    ext
}

/// Map an axis angle into (-90, 90].
fn normalize_axis_deg(deg: f64) -> f64 {
    let mut d = deg;
    while d > 90.0 {
        d -= 180.0;
    }
    while d <= -90.0 {
        d += 180.0;
    }
    d
}

fn boundary_pixels(det: &Detection) -> usize {
    let bb = det.bbox;
    let mut grid = vec![false; bb.width * bb.height];
    for &(x, y) in &det.pixels {
        grid[(y - bb.y) * bb.width + (x - bb.x)] = true;
    }
    let inside = |x: isize, y: isize| -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < bb.width
            && (y as usize) < bb.height
            && grid[y as usize * bb.width + x as usize]
    };
    det.pixels
        .iter()
        .filter(|&&(x, y)| {
            let lx = (x - bb.x) as isize;
            let ly = (y - bb.y) as isize;
            !(inside(lx - 1, ly) && inside(lx + 1, ly) && inside(lx, ly - 1) && inside(lx, ly + 1))
        })
        .count()
}

/// Area of the convex hull of all pixel corners (pixels are unit squares).
fn convex_hull_area(pixels: &[(usize, usize)]) -> f64 {
    // Only the leftmost and rightmost pixel of each row can touch the hull.
    let mut rows: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for &(x, y) in pixels {
        let e = rows.entry(y).or_insert((x, x));
        e.0 = e.0.min(x);
        e.1 = e.1.max(x);
    }
    let mut corners: Vec<Point<i64>> = Vec::with_capacity(rows.len() * 4);
    for (&y, &(x0, x1)) in &rows {
        let (y, x0, x1) = (y as i64, x0 as i64, x1 as i64 + 1);
        corners.extend_from_slice(&[
            Point::new(x0, y),
            Point::new(x0, y + 1),
            Point::new(x1, y),
            Point::new(x1, y + 1),
        ]);
    }
    corners.sort_unstable_by_key(|p| (p.x, p.y));
    corners.dedup();
    if corners.len() < 3 {
        return 0.0;
    }

    let hull = convex_hull(corners);
    let twice_area: i64 = (0..hull.len())
        .map(|i| {
            let (a, b) = (hull[i], hull[(i + 1) % hull.len()]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice_area.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: usize, y0: usize, w: usize, h: usize) -> Detection {
        let pixels = (y0..y0 + h)
            .flat_map(|y| (x0..x0 + w).map(move |x| (x, y)))
            .collect();
        Detection::from_pixels(pixels).unwrap()
    }

    fn analyzer() -> MorphologyAnalyzer {
        MorphologyAnalyzer::new(&BehaviorConfig::default())
    }

    #[test]
    fn test_square_is_ball() {
        let m = analyzer().analyze(&rect(10, 10, 5, 5));
        assert_eq!(m.area_px, 25.0);
        assert!((m.aspect_ratio - 1.0).abs() < 1e-9);
        assert_eq!(m.pose, Pose::Ball);
        assert!(m.head_axis.is_none());
        assert!((m.solidity - 1.0).abs() < 1e-9);
        // 5x5 square: 16 boundary pixels
        assert_eq!(m.perimeter_px, 16.0);
    }

    #[test]
    fn test_horizontal_bar_is_elongated() {
        let m = analyzer().analyze(&rect(10, 10, 12, 3));
        assert!((m.long_axis_px - 12.0).abs() < 1e-9);
        assert!((m.short_axis_px - 3.0).abs() < 1e-9);
        assert!((m.aspect_ratio - 4.0).abs() < 1e-9);
        assert!((m.elongation - 0.75).abs() < 1e-9);
        assert!(m.body_axis_deg.abs() < 1e-6);
        assert_eq!(m.pose, Pose::Elongated);
    }

    #[test]
    fn test_vertical_bar_axis() {
        let m = analyzer().analyze(&rect(10, 10, 2, 10));
        assert!((m.aspect_ratio - 5.0).abs() < 1e-9);
        assert!((m.body_axis_deg.abs() - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_head_is_heavier_end() {
        // 12px shaft, 5px tall block at the right end
        let mut pixels: Vec<(usize, usize)> = (10..22).map(|x| (x, 20)).collect();
        for y in 18..23 {
            for x in 19..22 {
                if y != 20 {
                    pixels.push((x, y));
                }
            }
        }
        let det = Detection::from_pixels(pixels).unwrap();
        let m = analyzer().analyze(&det);
        assert_eq!(m.pose, Pose::Elongated);
        let (hx, _) = m.head_axis.unwrap();
        assert!(hx > 0.9, "head should point right, got {hx}");
    }

    #[test]
    fn test_solidity_of_l_shape() {
        // L: 4x1 row + 1x3 column sharing a corner
        let pixels = vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 3), (2, 3), (3, 3)];
        let det = Detection::from_pixels(pixels).unwrap();
        let m = analyzer().analyze(&det);
        assert!(m.solidity < 1.0);
        assert!(m.solidity > 0.5);
    }

    #[test]
    fn test_single_pixel() {
        let det = Detection::from_pixels(vec![(3, 3)]).unwrap();
        let m = analyzer().analyze(&det);
        assert_eq!(m.aspect_ratio, 1.0);
        assert_eq!(m.perimeter_px, 1.0);
        assert_eq!(m.solidity, 1.0);
    }
}
