//! Chart segmentation
//!
//! Triangles are connected through edges matched by position, so vertices
//! split along old UV seams do not break adjacency. Hard and non-manifold
//! edges always separate charts. Charts grow from the flattest free triangle
//! and admit neighbours whose normal stays close to the chart's average.

use lodforge_core::{position_key, Mesh, Vector3f};
use priority_queue::PriorityQueue;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Neighbour across each edge of a triangle, `edge k` running from corner
/// `k` to corner `k + 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeNeighbor {
    pub triangle: Option<usize>,
    /// Dihedral angle above the hard threshold
    pub hard: bool,
}

/// Per-triangle edge adjacency
pub type FaceAdjacency = Vec<[EdgeNeighbor; 3]>;

/// A set of triangles flattened and packed together
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub triangles: Vec<usize>,
    /// Area-weighted average normal
    pub normal: Vector3f,
    /// Zero-area triangle that gets a fixed placeholder layout
    pub degenerate: bool,
}

/// Build edge adjacency over position-welded edges.
///
/// Only edges shared by exactly two triangles connect; boundary and
/// non-manifold edges get no neighbour.
pub fn face_adjacency(mesh: &Mesh, hard_angle_degrees: f32) -> FaceAdjacency {
    let cos_hard = hard_angle_degrees.to_radians().cos();
    let mut position_ids: HashMap<[u32; 3], usize> = HashMap::new();
    let pid: Vec<usize> = mesh
        .vertices
        .iter()
        .map(|v| {
            let next = position_ids.len();
            *position_ids.entry(position_key(&v.position)).or_insert(next)
        })
        .collect();

    let mut edges: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();
    for (t, tri) in mesh.triangles.iter().enumerate() {
        for k in 0..3 {
            let a = pid[tri.indices[k]];
            let b = pid[tri.indices[(k + 1) % 3]];
            if a != b {
                edges.entry((a.min(b), a.max(b))).or_default().push((t, k));
            }
        }
    }

    let normals: Vec<Option<Vector3f>> = (0..mesh.triangle_count()).map(|t| mesh.triangle_normal(t)).collect();
    let mut adjacency = vec![[EdgeNeighbor::default(); 3]; mesh.triangle_count()];
    for sides in edges.values() {
        if let [(t0, k0), (t1, k1)] = sides[..] {
            if t0 == t1 {
                continue;
            }
            let hard = match (normals[t0], normals[t1]) {
                (Some(n0), Some(n1)) => n0.dot(&n1) < cos_hard,
                _ => true,
            };
            adjacency[t0][k0] = EdgeNeighbor { triangle: Some(t1), hard };
            adjacency[t1][k1] = EdgeNeighbor { triangle: Some(t0), hard };
        }
    }
    adjacency
}

/// Growth priority: smaller deviation from the chart normal pops first
#[derive(Debug, Clone, Copy, PartialEq)]
struct Deviation(f32);

impl Eq for Deviation {}

impl PartialOrd for Deviation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deviation {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.total_cmp(&self.0)
    }
}

/// Mean `1 - cos` between a triangle and its soft neighbours
fn flatness(t: usize, normals: &[Option<Vector3f>], adjacency: &FaceAdjacency) -> f32 {
    let Some(n) = normals[t] else {
        return f32::INFINITY;
    };
    let mut sum = 0.0;
    let mut count = 0;
    for edge in &adjacency[t] {
        if let Some(nt) = edge.triangle.and_then(|o| normals[o]) {
            sum += 1.0 - n.dot(&nt);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Partition all triangles of `mesh` into charts.
pub fn build_charts(mesh: &Mesh, hard_angle_degrees: f32, max_chart_angle_degrees: f32) -> Vec<Chart> {
    let n = mesh.triangle_count();
    let adjacency = face_adjacency(mesh, hard_angle_degrees);
    let normals: Vec<Option<Vector3f>> = (0..n).map(|t| mesh.triangle_normal(t)).collect();
    let areas: Vec<f32> = (0..n).map(|t| mesh.triangle_area(t)).collect();
    let cos_chart = max_chart_angle_degrees.to_radians().cos();

    let mut assigned = vec![false; n];
    let mut charts = Vec::new();

    // zero-area triangles cannot be flattened; each gets its own chart
    for t in 0..n {
        if normals[t].is_none() {
            assigned[t] = true;
            charts.push(Chart {
                triangles: vec![t],
                normal: Vector3f::z(),
                degenerate: true,
            });
        }
    }

    let mut seeds: Vec<(f32, usize)> = (0..n)
        .filter(|&t| !assigned[t])
        .map(|t| (flatness(t, &normals, &adjacency), t))
        .collect();
    seeds.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for (_, seed) in seeds {
        if assigned[seed] {
            continue;
        }
        let Some(seed_normal) = normals[seed] else {
            continue;
        };
        assigned[seed] = true;
        let mut triangles = vec![seed];
        let mut normal_sum = seed_normal * areas[seed];
        let mut average = seed_normal;
        let mut queue: PriorityQueue<usize, Deviation> = PriorityQueue::new();

        let push_neighbors = |t: usize, average: &Vector3f, queue: &mut PriorityQueue<usize, Deviation>, assigned: &[bool]| {
            for edge in &adjacency[t] {
                let Some(o) = edge.triangle else { continue };
                if edge.hard || assigned[o] {
                    continue;
                }
                if let Some(no) = normals[o] {
                    queue.push_increase(o, Deviation(1.0 - no.dot(average)));
                }
            }
        };
        push_neighbors(seed, &average, &mut queue, &assigned);

        while let Some((t, _)) = queue.pop() {
            if assigned[t] {
                continue;
            }
            let Some(nt) = normals[t] else { continue };
            if nt.dot(&average) < cos_chart {
                continue;
            }
            assigned[t] = true;
            triangles.push(t);
            normal_sum += nt * areas[t];
            average = normal_sum.try_normalize(f32::EPSILON).unwrap_or(average);

            // the average moved, refresh queued priorities
            let queued: Vec<usize> = queue.iter().map(|(&item, _)| item).collect();
            for item in queued {
                if let Some(ni) = normals[item] {
                    queue.change_priority(&item, Deviation(1.0 - ni.dot(&average)));
                }
            }
            push_neighbors(t, &average, &mut queue, &assigned);
        }

        triangles.sort_unstable();
        charts.push(Chart {
            triangles,
            normal: average,
            degenerate: false,
        });
    }

    charts
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodforge_core::Point3f;

    fn make_cube() -> Mesh {
        let positions = vec![
            Point3f::new(-1.0, -1.0, -1.0),
            Point3f::new(1.0, -1.0, -1.0),
            Point3f::new(1.0, 1.0, -1.0),
            Point3f::new(-1.0, 1.0, -1.0),
            Point3f::new(-1.0, -1.0, 1.0),
            Point3f::new(1.0, -1.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(-1.0, 1.0, 1.0),
        ];
        let faces = vec![
            [0, 2, 1], [0, 3, 2], // -z
            [4, 5, 6], [4, 6, 7], // +z
            [0, 1, 5], [0, 5, 4], // -y
            [2, 3, 7], [2, 7, 6], // +y
            [1, 2, 6], [1, 6, 5], // +x
            [0, 4, 7], [0, 7, 3], // -x
        ];
        Mesh::from_positions(positions, faces)
    }

    fn make_strip(n: usize, bend_degrees: f32) -> Mesh {
        // quads hinged along x, each rotated a further `bend` around the x axis
        let mut positions = Vec::new();
        let mut y = 0.0f32;
        let mut z = 0.0f32;
        let mut angle = 0.0f32;
        positions.push(Point3f::new(0.0, y, z));
        positions.push(Point3f::new(1.0, y, z));
        for _ in 0..n {
            y += angle.to_radians().cos();
            z += angle.to_radians().sin();
            positions.push(Point3f::new(0.0, y, z));
            positions.push(Point3f::new(1.0, y, z));
            angle += bend_degrees;
        }
        let mut faces = Vec::new();
        for i in 0..n {
            let a = 2 * i;
            faces.push([a, a + 1, a + 3]);
            faces.push([a, a + 3, a + 2]);
        }
        Mesh::from_positions(positions, faces)
    }

    #[test]
    fn test_cube_adjacency() {
        let mesh = make_cube();
        let adj = face_adjacency(&mesh, 70.0);
        for (t, edges) in adj.iter().enumerate() {
            let soft: Vec<_> = edges.iter().filter(|e| !e.hard).collect();
            assert_eq!(soft.len(), 1, "triangle {} should have one coplanar neighbour", t);
            assert!(edges.iter().all(|e| e.triangle.is_some()));
        }
    }

    #[test]
    fn test_cube_charts() {
        let mesh = make_cube();
        let charts = build_charts(&mesh, 70.0, 60.0);
        assert_eq!(charts.len(), 6);
        let mut all: Vec<usize> = charts.iter().flat_map(|c| c.triangles.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
        for c in &charts {
            assert_eq!(c.triangles.len(), 2);
            assert!(!c.degenerate);
        }
    }

    #[test]
    fn test_gentle_bend_single_chart() {
        let mesh = make_strip(6, 5.0);
        let charts = build_charts(&mesh, 70.0, 60.0);
        assert_eq!(charts.len(), 1);
    }

    #[test]
    fn test_chart_angle_limit_splits() {
        // total bend of 150 degrees cannot stay within a 45 degree cone
        let mesh = make_strip(6, 25.0);
        let charts = build_charts(&mesh, 70.0, 45.0);
        assert!(charts.len() > 1);
        let total: usize = charts.iter().map(|c| c.triangles.len()).sum();
        assert_eq!(total, mesh.triangle_count());
    }

    #[test]
    fn test_degenerate_triangle_own_chart() {
        let mut mesh = make_cube();
        mesh.vertices.push(lodforge_core::Vertex::new(Point3f::new(3.0, 0.0, 0.0)));
        mesh.vertices.push(lodforge_core::Vertex::new(Point3f::new(4.0, 0.0, 0.0)));
        mesh.vertices.push(lodforge_core::Vertex::new(Point3f::new(5.0, 0.0, 0.0)));
        mesh.triangles.push(lodforge_core::Triangle::new([8, 9, 10], 0));
        let charts = build_charts(&mesh, 70.0, 60.0);
        let degenerate: Vec<_> = charts.iter().filter(|c| c.degenerate).collect();
        assert_eq!(degenerate.len(), 1);
        assert_eq!(degenerate[0].triangles, vec![12]);
    }
}
