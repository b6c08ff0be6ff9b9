//! Axis-aligned bounding boxes

use crate::point::*;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
///
/// The empty box has `min > max` on every axis so that growing it by any
/// point yields that point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3f,
    pub max: Point3f,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Point3f::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3f::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn new(min: Point3f, max: Point3f) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3f>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.grow(p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&mut self, p: &Point3f) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Box enlarged by `margin` on every side
    pub fn expanded(&self, margin: f32) -> Aabb {
        let m = Vector3f::repeat(margin);
        Aabb {
            min: self.min - m,
            max: self.max + m,
        }
    }

    pub fn extent(&self) -> Vector3f {
        if self.is_empty() {
            Vector3f::zeros()
        } else {
            self.max - self.min
        }
    }

    pub fn center(&self) -> Point3f {
        Point3f::from((self.min.coords + self.max.coords) * 0.5)
    }

    /// Index of the longest axis
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    pub fn diagonal(&self) -> f32 {
        self.extent().norm()
    }

    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    pub fn contains(&self, p: &Point3f) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Squared distance from `p` to the box (0 inside)
    pub fn distance_squared(&self, p: &Point3f) -> f32 {
        let mut d = 0.0;
        for i in 0..3 {
            let v = p[i];
            if v < self.min[i] {
                d += (self.min[i] - v) * (self.min[i] - v);
            } else if v > self.max[i] {
                d += (v - self.max[i]) * (v - self.max[i]);
            }
        }
        d
    }

    /// Slab test. `inv_dir` is the component-wise reciprocal of the ray
    /// direction. Returns the parameter interval `[t0, t1]` over which the
    /// ray is inside the box, clipped to `[t_min, t_max]`.
    pub fn ray_interval(
        &self,
        origin: &Point3f,
        inv_dir: &Vector3f,
        t_min: f32,
        t_max: f32,
    ) -> Option<(f32, f32)> {
        let mut t0 = t_min;
        let mut t1 = t_max;
        for i in 0..3 {
            let mut near = (self.min[i] - origin[i]) * inv_dir[i];
            let mut far = (self.max[i] - origin[i]) * inv_dir[i];
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            // NaN from 0 * inf keeps the previous bound
            if near > t0 {
                t0 = near;
            }
            if far < t1 {
                t1 = far;
            }
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }

    /// Entry distance of a ray into the box within `[t_min, t_max]`
    pub fn ray_entry(&self, origin: &Point3f, inv_dir: &Vector3f, t_min: f32, t_max: f32) -> Option<f32> {
        self.ray_interval(origin, inv_dir, t_min, t_max).map(|(t0, _)| t0)
    }

    /// Normalise `p` into `[0, 1]^3` relative to this box. Flat axes map to 0.5.
    pub fn normalize_point(&self, p: &Point3f) -> Vector3f {
        let e = self.extent();
        let mut out = Vector3f::zeros();
        for i in 0..3 {
            out[i] = if e[i] > f32::EPSILON {
                ((p[i] - self.min[i]) / e[i]).clamp(0.0, 1.0)
            } else {
                0.5
            };
        }
        out
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grow_and_union() {
        let mut a = Aabb::empty();
        assert!(a.is_empty());
        a.grow(&Point3f::new(1.0, 2.0, 3.0));
        a.grow(&Point3f::new(-1.0, 0.0, 5.0));
        assert_eq!(a.min, Point3f::new(-1.0, 0.0, 3.0));
        assert_eq!(a.max, Point3f::new(1.0, 2.0, 5.0));

        let b = Aabb::new(Point3f::new(0.0, 0.0, 0.0), Point3f::new(4.0, 1.0, 1.0));
        let u = a.union(&b);
        assert_eq!(u.max.x, 4.0);
        assert_eq!(u.min.z, 0.0);
        assert_eq!(u.longest_axis(), 0);
    }

    #[test]
    fn test_surface_area() {
        let a = Aabb::new(Point3f::origin(), Point3f::new(1.0, 2.0, 3.0));
        assert_relative_eq!(a.surface_area(), 22.0);
        assert_eq!(Aabb::empty().surface_area(), 0.0);
    }

    #[test]
    fn test_ray_entry() {
        let a = Aabb::new(Point3f::new(-1.0, -1.0, -1.0), Point3f::new(1.0, 1.0, 1.0));
        let origin = Point3f::new(-5.0, 0.0, 0.0);
        let dir = Vector3f::new(1.0, 0.0, 0.0);
        let inv = dir.map(|d| 1.0 / d);
        let t = a.ray_entry(&origin, &inv, 0.0, 100.0).unwrap();
        assert_relative_eq!(t, 4.0);
        assert!(a.ray_entry(&origin, &inv, 0.0, 3.0).is_none());

        let miss = Point3f::new(-5.0, 3.0, 0.0);
        assert!(a.ray_entry(&miss, &inv, 0.0, 100.0).is_none());
    }

    #[test]
    fn test_distance_squared() {
        let a = Aabb::new(Point3f::origin(), Point3f::new(1.0, 1.0, 1.0));
        assert_eq!(a.distance_squared(&Point3f::new(0.5, 0.5, 0.5)), 0.0);
        assert_relative_eq!(a.distance_squared(&Point3f::new(3.0, 0.5, 0.5)), 4.0);
    }
}
