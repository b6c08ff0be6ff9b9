//! UV space triangle lookup
//!
//! A uniform grid over the unit square; every cell lists the triangles whose
//! UV bounding box touches it.

use lodforge_core::{Mesh, Point2f};

/// Barycentric slack accepted on triangle edges
const EDGE_EPSILON: f32 = 1e-5;

/// Grid mapping atlas UVs back to triangles of a mesh
#[derive(Debug, Clone)]
pub struct UvLookupGrid {
    cells: Vec<Vec<usize>>,
    size: usize,
    /// UV corners per triangle
    corners: Vec<[Point2f; 3]>,
}

impl UvLookupGrid {
    /// Index `mesh` by its UVs in `channel`
    pub fn build(mesh: &Mesh, channel: usize) -> Self {
        let n = mesh.triangle_count();
        let size = ((n as f32).sqrt().ceil() as usize).clamp(1, 512);
        let mut cells = vec![Vec::new(); size * size];
        let corners: Vec<[Point2f; 3]> = (0..n).map(|t| mesh.triangle_uvs(t, channel)).collect();

        for (t, uv) in corners.iter().enumerate() {
            let min_u = uv.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
            let max_u = uv.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
            let min_v = uv.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
            let max_v = uv.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
            if max_u < 0.0 || max_v < 0.0 || min_u > 1.0 || min_v > 1.0 {
                continue;
            }
            let (x0, x1) = (Self::cell_of(min_u, size), Self::cell_of(max_u, size));
            let (y0, y1) = (Self::cell_of(min_v, size), Self::cell_of(max_v, size));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    cells[y * size + x].push(t);
                }
            }
        }

        Self { cells, size, corners }
    }

    fn cell_of(coord: f32, size: usize) -> usize {
        ((coord.clamp(0.0, 1.0) * size as f32) as usize).min(size - 1)
    }

    /// Triangle containing `uv` and the barycentric coordinates of `uv` in it
    pub fn locate(&self, uv: Point2f) -> Option<(usize, [f32; 3])> {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return None;
        }
        let cell = Self::cell_of(uv.y, self.size) * self.size + Self::cell_of(uv.x, self.size);
        self.cells[cell].iter().find_map(|&t| {
            let bary = barycentric(&self.corners[t], uv)?;
            bary.iter().all(|&w| w >= -EDGE_EPSILON).then(|| (t, clamp_barycentric(bary)))
        })
    }
}

/// Barycentric coordinates of `p` in a UV triangle; `None` when it has no area
pub fn barycentric(tri: &[Point2f; 3], p: Point2f) -> Option<[f32; 3]> {
    let [a, b, c] = *tri;
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let det = v0.x * v1.y - v1.x * v0.y;
    if det.abs() <= f32::MIN_POSITIVE {
        return None;
    }
    let w1 = (v2.x * v1.y - v1.x * v2.y) / det;
    let w2 = (v0.x * v2.y - v2.x * v0.y) / det;
    Some([1.0 - w1 - w2, w1, w2])
}

fn clamp_barycentric(bary: [f32; 3]) -> [f32; 3] {
    let clamped = bary.map(|w| w.max(0.0));
    let sum: f32 = clamped.iter().sum();
    clamped.map(|w| w / sum)
}
