//! Least squares conformal maps
//!
//! Each triangle contributes two rows expressing the Cauchy-Riemann
//! conditions in its own planar frame, weighted by `1 / sqrt(2 * area)`.
//! Two vertices are pinned to fix translation, rotation and scale; the
//! remaining least squares system is solved with CGLS (conjugate gradient on
//! the normal equations) without ever forming `A^T A`.

use lodforge_core::{Point2f, Point3f, Vector3f};

/// Relative residual at which CGLS stops
const CG_TOLERANCE: f64 = 1e-10;

/// Triangles whose signed UV area falls below this fraction of the mean
/// count as folded
const FOLD_EPSILON: f64 = 1e-8;

/// One sparse row: `(variable, coefficient)` pairs
type Row = Vec<(usize, f64)>;

/// Flatten a connected triangle patch with LSCM.
///
/// `positions` are the patch's local vertices, `triangles` index into them.
/// Returns `None` when the solve does not converge to a fold-free layout.
pub fn lscm(positions: &[Point3f], triangles: &[[usize; 3]]) -> Option<Vec<Point2f>> {
    let n = positions.len();
    if n < 3 || triangles.is_empty() {
        return None;
    }
    let (pin_a, pin_b) = pick_pins(positions);
    let span = (positions[pin_b] - positions[pin_a]).norm() as f64;
    if span <= 0.0 {
        return None;
    }

    // free vertex -> variable slot
    let mut slot = vec![usize::MAX; n];
    let mut free = 0;
    for (v, s) in slot.iter_mut().enumerate() {
        if v != pin_a && v != pin_b {
            *s = free;
            free += 1;
        }
    }
    let pinned = |v: usize| -> Option<(f64, f64)> {
        if v == pin_a {
            Some((0.0, 0.0))
        } else if v == pin_b {
            Some((span, 0.0))
        } else {
            None
        }
    };

    let mut rows: Vec<Row> = Vec::with_capacity(triangles.len() * 2);
    let mut rhs: Vec<f64> = Vec::with_capacity(triangles.len() * 2);
    for tri in triangles {
        let Some(local) = local_frame(positions, tri) else {
            continue;
        };
        let area2 = local_area2(&local);
        if area2 <= 0.0 {
            continue;
        }
        let w = 1.0 / area2.sqrt();
        // W_j = (x_{j+2} - x_{j+1}) + i (y_{j+2} - y_{j+1})
        let mut real: Row = Vec::with_capacity(6);
        let mut imag: Row = Vec::with_capacity(6);
        let mut b_real = 0.0;
        let mut b_imag = 0.0;
        for j in 0..3 {
            let p1 = local[(j + 1) % 3];
            let p2 = local[(j + 2) % 3];
            let a = (p2.0 - p1.0) * w;
            let b = (p2.1 - p1.1) * w;
            let v = tri[j];
            match pinned(v) {
                Some((u0, v0)) => {
                    b_real -= a * u0 - b * v0;
                    b_imag -= b * u0 + a * v0;
                }
                None => {
                    let s = slot[v];
                    real.push((2 * s, a));
                    real.push((2 * s + 1, -b));
                    imag.push((2 * s, b));
                    imag.push((2 * s + 1, a));
                }
            }
        }
        rows.push(real);
        rhs.push(b_real);
        rows.push(imag);
        rhs.push(b_imag);
    }
    if rows.is_empty() {
        return None;
    }

    let x = cgls(&rows, &rhs, 2 * free, (20 * free).max(200))?;

    let mut uvs: Vec<(f64, f64)> = (0..n)
        .map(|v| pinned(v).unwrap_or_else(|| (x[2 * slot[v]], x[2 * slot[v] + 1])))
        .collect();

    // a consistent clockwise layout is a mirror image, not a fold
    let areas: Vec<f64> = triangles.iter().map(|t| signed_area2(&uvs, t)).collect();
    let total: f64 = areas.iter().sum();
    if total < 0.0 {
        for uv in &mut uvs {
            uv.1 = -uv.1;
        }
    }
    let mean = total.abs() / triangles.len() as f64;
    let sign = total.signum();
    if mean <= 0.0 || areas.iter().any(|a| a * sign <= FOLD_EPSILON * mean) {
        return None;
    }

    Some(uvs.into_iter().map(|(u, v)| Point2f::new(u as f32, v as f32)).collect())
}

/// Orthographic projection onto the plane perpendicular to `normal`
pub fn planar_projection(positions: &[Point3f], normal: &Vector3f) -> Vec<Point2f> {
    let n = normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z);
    let helper = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    let u_axis = (helper - n * n.dot(&helper)).normalize();
    let v_axis = n.cross(&u_axis);
    positions
        .iter()
        .map(|p| Point2f::new(p.coords.dot(&u_axis), p.coords.dot(&v_axis)))
        .collect()
}

/// Twice the signed area of a UV triangle
pub fn uv_signed_area2(uvs: &[Point2f], tri: &[usize; 3]) -> f32 {
    let a = uvs[tri[0]];
    let b = uvs[tri[1]];
    let c = uvs[tri[2]];
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

fn signed_area2(uvs: &[(f64, f64)], tri: &[usize; 3]) -> f64 {
    let a = uvs[tri[0]];
    let b = uvs[tri[1]];
    let c = uvs[tri[2]];
    (b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)
}

/// Two roughly extremal vertices: farthest from vertex 0, then farthest from that
fn pick_pins(positions: &[Point3f]) -> (usize, usize) {
    let farthest = |from: usize| {
        (0..positions.len())
            .max_by(|&a, &b| {
                let da = (positions[a] - positions[from]).norm_squared();
                let db = (positions[b] - positions[from]).norm_squared();
                da.total_cmp(&db)
            })
            .unwrap_or(from)
    };
    let a = farthest(0);
    let b = farthest(a);
    (a, b)
}

/// Triangle corners in an orthonormal frame of its own plane
fn local_frame(positions: &[Point3f], tri: &[usize; 3]) -> Option<[(f64, f64); 3]> {
    let p0 = positions[tri[0]].coords.cast::<f64>();
    let p1 = positions[tri[1]].coords.cast::<f64>();
    let p2 = positions[tri[2]].coords.cast::<f64>();
    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let x_axis = e1.try_normalize(1e-30)?;
    let normal = e1.cross(&e2).try_normalize(1e-30)?;
    let y_axis = normal.cross(&x_axis);
    Some([(0.0, 0.0), (e1.norm(), 0.0), (e2.dot(&x_axis), e2.dot(&y_axis))])
}

fn local_area2(local: &[(f64, f64); 3]) -> f64 {
    let [a, b, c] = *local;
    (b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)
}

fn apply(rows: &[Row], x: &[f64]) -> Vec<f64> {
    rows.iter()
        .map(|row| row.iter().map(|&(j, a)| a * x[j]).sum())
        .collect()
}

fn apply_transpose(rows: &[Row], y: &[f64], cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; cols];
    for (row, &yi) in rows.iter().zip(y) {
        for &(j, a) in row {
            out[j] += a * yi;
        }
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Minimise `|A x - b|` by conjugate gradient on the normal equations
fn cgls(rows: &[Row], b: &[f64], cols: usize, max_iterations: usize) -> Option<Vec<f64>> {
    let mut x = vec![0.0; cols];
    if cols == 0 {
        return Some(x);
    }
    let mut r = b.to_vec();
    let mut s = apply_transpose(rows, &r, cols);
    let mut p = s.clone();
    let mut gamma = dot(&s, &s);
    let gamma0 = gamma;
    if gamma0 == 0.0 {
        return Some(x);
    }

    for _ in 0..max_iterations {
        let q = apply(rows, &p);
        let qq = dot(&q, &q);
        if qq <= 0.0 || !qq.is_finite() {
            break;
        }
        let alpha = gamma / qq;
        for (xi, pi) in x.iter_mut().zip(&p) {
            *xi += alpha * pi;
        }
        for (ri, qi) in r.iter_mut().zip(&q) {
            *ri -= alpha * qi;
        }
        s = apply_transpose(rows, &r, cols);
        let gamma_new = dot(&s, &s);
        if gamma_new <= CG_TOLERANCE * CG_TOLERANCE * gamma0 {
            break;
        }
        let beta = gamma_new / gamma;
        for (pi, si) in p.iter_mut().zip(&s) {
            *pi = si + beta * *pi;
        }
        gamma = gamma_new;
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}
