//! Ray/triangle and point/triangle primitives

use lodforge_core::{Point3f, Vector3f};

/// Two-sided Möller-Trumbore intersection.
///
/// Returns `(t, u, v)` where the hit point is `origin + t * dir` and
/// `(1 - u - v, u, v)` are the barycentric weights of the three corners.
/// Any sign of `t` is returned; callers clip to their own interval.
pub fn ray_triangle(origin: &Point3f, dir: &Vector3f, tri: &[Point3f; 3]) -> Option<(f32, f32, f32)> {
    const EPS: f32 = 1e-9;
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(&p) * inv_det;
    if !(-1e-6..=1.0 + 1e-6).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv_det;
    if v < -1e-6 || u + v > 1.0 + 1e-6 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    Some((t, u, v))
}

/// Closest point on a triangle to `p`, with its barycentric weights.
///
/// Voronoi-region walk from Ericson, "Real-Time Collision Detection" 5.1.5.
pub fn closest_point_on_triangle(p: &Point3f, tri: &[Point3f; 3]) -> (Point3f, [f32; 3]) {
    let [a, b, c] = *tri;
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let denom = va + vb + vc;
    if denom.abs() < f32::MIN_POSITIVE {
        // degenerate triangle, fall back to the nearest corner
        let da = (p - a).norm_squared();
        let db = (p - b).norm_squared();
        let dc = (p - c).norm_squared();
        return if da <= db && da <= dc {
            (a, [1.0, 0.0, 0.0])
        } else if db <= dc {
            (b, [0.0, 1.0, 0.0])
        } else {
            (c, [0.0, 0.0, 1.0])
        };
    }
    let v = vb / denom;
    let w = vc / denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}
