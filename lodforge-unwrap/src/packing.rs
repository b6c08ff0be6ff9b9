//! Chart orientation and rectangle packing
//!
//! Charts are first rotated so their minimum-area bounding rectangle is axis
//! aligned, then placed into the atlas with a guillotine packer using the
//! best short side fit rule.

use lodforge_core::Point2f;
use serde::{Deserialize, Serialize};

/// Pixel rectangle occupied by a chart inside the atlas (gutter excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PackedRect {
    /// Whether the two rectangles, each grown by `padding` on every side, overlap
    pub fn overlaps(&self, other: &PackedRect, padding: u32) -> bool {
        let (ax0, ay0) = (self.x as i64 - padding as i64, self.y as i64 - padding as i64);
        let (ax1, ay1) = (
            (self.x + self.width + padding) as i64,
            (self.y + self.height + padding) as i64,
        );
        let (bx0, by0) = (other.x as i64, other.y as i64);
        let (bx1, by1) = ((other.x + other.width) as i64, (other.y + other.height) as i64);
        ax0 < bx1 && bx0 < ax1 && ay0 < by1 && by0 < ay1
    }
}

/// Convex hull by Andrew's monotone chain, counter-clockwise
pub fn convex_hull(points: &[Point2f]) -> Vec<Point2f> {
    let mut sorted: Vec<Point2f> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    fn cross(o: &Point2f, a: &Point2f, b: &Point2f) -> f32 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    let mut hull: Vec<Point2f> = Vec::with_capacity(sorted.len() * 2);
    for p in sorted.iter() {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    let lower_len = hull.len() + 1;
    for p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

/// Rotation angle (radians) that makes the minimum-area bounding rectangle
/// of `points` axis aligned
///
/// Rotating calipers over the hull: the optimal rectangle has one side
/// collinear with a hull edge, so only hull edge directions are tried.
pub fn min_area_rotation(points: &[Point2f]) -> f32 {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return match hull.as_slice() {
            [a, b] => -(b.y - a.y).atan2(b.x - a.x),
            _ => 0.0,
        };
    }

    let mut best_angle = 0.0;
    let mut best_area = f32::INFINITY;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let edge = b - a;
        let len = edge.norm();
        if len <= f32::EPSILON {
            continue;
        }
        let (dx, dy) = (edge.x / len, edge.y / len);
        let (mut min_u, mut max_u) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f32::INFINITY, f32::NEG_INFINITY);
        for p in &hull {
            let u = p.x * dx + p.y * dy;
            let v = -p.x * dy + p.y * dx;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if area < best_area {
            best_area = area;
            best_angle = -dy.atan2(dx);
        }
    }
    best_angle
}

/// Rotate `points` by `angle` and translate them so their bounds start at the origin.
///
/// Returns the bounding extent after the transform.
pub fn orient_to_origin(points: &mut [Point2f], angle: f32) -> (f32, f32) {
    let (sin, cos) = angle.sin_cos();
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in points.iter_mut() {
        *p = Point2f::new(p.x * cos - p.y * sin, p.x * sin + p.y * cos);
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if points.is_empty() {
        return (0.0, 0.0);
    }
    for p in points.iter_mut() {
        p.x -= min_x;
        p.y -= min_y;
    }
    (max_x - min_x, max_y - min_y)
}

// ============================================================================
// Guillotine packer
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FreeRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Free rectangle whose leftover short side is smallest after placing `w x h`
fn find_bssf(free_rects: &[FreeRect], w: u32, h: u32) -> Option<usize> {
    let mut best_idx = None;
    let mut best_short_side = u32::MAX;

    for (i, rect) in free_rects.iter().enumerate() {
        if rect.w >= w && rect.h >= h {
            let short_side = (rect.w - w).min(rect.h - h);
            if short_side < best_short_side {
                best_short_side = short_side;
                best_idx = Some(i);
            }
        }
    }

    best_idx
}

fn guillotine_split(free_rects: &mut Vec<FreeRect>, rect: &FreeRect, w: u32, h: u32) {
    let right_w = rect.w - w;
    let below_h = rect.h - h;

    if right_w > 0 {
        free_rects.push(FreeRect {
            x: rect.x + w,
            y: rect.y,
            w: right_w,
            h,
        });
    }

    if below_h > 0 {
        free_rects.push(FreeRect {
            x: rect.x,
            y: rect.y + h,
            w: rect.w,
            h: below_h,
        });
    }
}

/// Pack chart rectangles of `sizes` (width, height in pixels) into a square
/// atlas of `resolution` pixels, keeping `gutter` pixels between charts and
/// around the border.
///
/// Returns one rectangle per input size, in input order, or `None` when the
/// set does not fit.
pub fn pack_rects(sizes: &[(u32, u32)], resolution: u32, gutter: u32) -> Option<Vec<PackedRect>> {
    if resolution <= gutter {
        return if sizes.is_empty() { Some(Vec::new()) } else { None };
    }
    let bin = resolution - gutter;

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let (aw, ah) = sizes[a];
        let (bw, bh) = sizes[b];
        bw.max(bh)
            .cmp(&aw.max(ah))
            .then((bw * bh).cmp(&(aw * ah)))
            .then(a.cmp(&b))
    });

    let mut free_rects = vec![FreeRect { x: 0, y: 0, w: bin, h: bin }];
    let mut placed = vec![PackedRect { x: 0, y: 0, width: 0, height: 0 }; sizes.len()];

    for idx in order {
        let (w, h) = sizes[idx];
        let (pw, ph) = (w + gutter, h + gutter);
        let slot = find_bssf(&free_rects, pw, ph)?;
        let rect = free_rects.swap_remove(slot);
        guillotine_split(&mut free_rects, &rect, pw, ph);
        placed[idx] = PackedRect {
            x: rect.x + gutter,
            y: rect.y + gutter,
            width: w,
            height: h,
        };
    }

    Some(placed)
}
