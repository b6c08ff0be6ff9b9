//! Quadric error metric
//!
//! A quadric is the symmetric 4x4 matrix `sum(p p^T)` over a set of planes
//! `p = (a, b, c, d)`. Evaluating it at a homogeneous point gives the sum of
//! squared distances from the point to those planes.

use lodforge_core::Point3f;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use std::ops::{Add, AddAssign, Mul};

/// Accumulated plane distance penalties of a vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric(pub Matrix4<f64>);

impl Quadric {
    pub fn zero() -> Self {
        Quadric(Matrix4::zeros())
    }

    /// Quadric of the plane through three points, `None` for degenerate input
    pub fn from_triangle(v0: &Point3f, v1: &Point3f, v2: &Point3f) -> Option<Self> {
        compute_plane(v0, v1, v2).map(|p| Self::from_plane(&p))
    }

    pub fn from_plane(p: &Vector4<f64>) -> Self {
        let (a, b, c, d) = (p[0], p[1], p[2], p[3]);
        #[rustfmt::skip]
        let m = Matrix4::new(
            a * a, a * b, a * c, a * d,
            a * b, b * b, b * c, b * d,
            a * c, b * c, c * c, c * d,
            a * d, b * d, c * d, d * d,
        );
        Quadric(m)
    }

    /// Sum of squared plane distances at `p`, clamped at zero
    pub fn evaluate(&self, p: &Point3f) -> f64 {
        let v = Vector4::new(p.x as f64, p.y as f64, p.z as f64, 1.0);
        (v.transpose() * self.0 * v)[0].max(0.0)
    }

    /// Point minimising the quadric, `None` when the 3x3 system is singular
    pub fn optimal_point(&self) -> Option<Point3f> {
        let a: Matrix3<f64> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        let b: Vector3<f64> = self.0.fixed_view::<3, 1>(0, 3).into_owned();
        // relative conditioning guard; nearly coplanar planes give wild solutions
        let scale = a.camax();
        if scale <= 0.0 || a.determinant().abs() < 1e-10 * scale * scale * scale {
            return None;
        }
        let x = a.try_inverse()? * -b;
        if x.iter().all(|c| c.is_finite()) {
            Some(Point3f::new(x[0] as f32, x[1] as f32, x[2] as f32))
        } else {
            None
        }
    }
}

impl Default for Quadric {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Quadric {
    type Output = Quadric;
    fn add(self, rhs: Quadric) -> Quadric {
        Quadric(self.0 + rhs.0)
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        self.0 += rhs.0;
    }
}

impl Mul<f64> for Quadric {
    type Output = Quadric;
    fn mul(self, rhs: f64) -> Quadric {
        Quadric(self.0 * rhs)
    }
}

/// Unit plane `(n, d)` with `n . x + d = 0` through three points
pub fn compute_plane(v0: &Point3f, v1: &Point3f, v2: &Point3f) -> Option<Vector4<f64>> {
    let to_f64 = |p: &Point3f| Vector3::new(p.x as f64, p.y as f64, p.z as f64);
    let (p0, p1, p2) = (to_f64(v0), to_f64(v1), to_f64(v2));
    let n = (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-20)?;
    let d = -n.dot(&p0);
    Some(Vector4::new(n.x, n.y, n.z, d))
}

/// Plane containing the edge `v0 -> v1` and perpendicular to the face
/// normal, used to keep open boundaries in place
pub fn boundary_plane(v0: &Point3f, v1: &Point3f, face_normal: &Vector3<f64>) -> Option<Vector4<f64>> {
    let p0 = Vector3::new(v0.x as f64, v0.y as f64, v0.z as f64);
    let p1 = Vector3::new(v1.x as f64, v1.y as f64, v1.z as f64);
    let n = (p1 - p0).cross(face_normal).try_normalize(1e-20)?;
    Some(Vector4::new(n.x, n.y, n.z, -n.dot(&p0)))
}
