//! Vertex welding pre-pass
//!
//! Vertices closer than a threshold are snapped onto a shared position.
//! Snapped vertices whose remaining attributes are identical are merged into
//! one; the others stay separate so UV seams and hard edges survive.

use lodforge_core::{Mesh, Point3f, Triangle};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use tracing::debug;

type IndexedPoint = GeomWithData<[f32; 3], usize>;

/// Counts from a welding pass, plus where each input triangle went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeldReport {
    /// Vertices moved onto another vertex's position
    pub snapped: usize,
    /// Vertices removed because an identical vertex already existed
    pub merged: usize,
    /// Triangles dropped after collapsing to fewer than three vertices
    pub degenerate_triangles: usize,
    /// Input triangle index to welded triangle index, `None` when dropped
    pub triangle_map: Vec<Option<usize>>,
}

impl WeldReport {
    /// Translate triangle indices of the input mesh to the welded mesh.
    ///
    /// Dropped triangles are left out. Indices past the input triangle count
    /// are passed through unchanged so later validation still reports them.
    pub fn remap_triangles(&self, triangles: &[usize]) -> Vec<usize> {
        triangles
            .iter()
            .filter_map(|&t| match self.triangle_map.get(t) {
                Some(mapped) => *mapped,
                None => Some(t),
            })
            .collect()
    }
}

/// Weld vertices of `mesh` lying within `threshold` of each other.
///
/// Clusters are formed greedily in vertex order: the first unassigned vertex
/// claims every unassigned vertex within the threshold. A non-positive
/// threshold leaves the mesh unchanged.
pub fn weld_vertices(mesh: &mut Mesh, threshold: f32) -> WeldReport {
    let mut report = WeldReport {
        triangle_map: (0..mesh.triangle_count()).map(Some).collect(),
        ..Default::default()
    };
    if threshold <= 0.0 || mesh.vertices.is_empty() {
        return report;
    }

    let points: Vec<IndexedPoint> = mesh
        .vertices
        .iter()
        .enumerate()
        .map(|(i, v)| GeomWithData::new([v.position.x, v.position.y, v.position.z], i))
        .collect();
    let tree = RTree::bulk_load(points);
    let radius_sq = threshold * threshold;

    let mut representative: Vec<Option<usize>> = vec![None; mesh.vertex_count()];
    for i in 0..mesh.vertex_count() {
        if representative[i].is_some() {
            continue;
        }
        representative[i] = Some(i);
        let p = mesh.vertices[i].position;
        let mut cluster: Vec<usize> = tree
            .locate_within_distance([p.x, p.y, p.z], radius_sq)
            .map(|g| g.data)
            .filter(|&j| representative[j].is_none())
            .collect();
        cluster.sort_unstable();
        for j in cluster {
            representative[j] = Some(i);
        }
    }

    // snap, then merge members identical to an earlier member of their cluster
    let mut remap: Vec<usize> = (0..mesh.vertex_count()).collect();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertex_count()];
    for i in 0..mesh.vertex_count() {
        let rep = representative[i].unwrap_or(i);
        if rep != i {
            let target: Point3f = mesh.vertices[rep].position;
            if mesh.vertices[i].position != target {
                mesh.vertices[i].position = target;
                report.snapped += 1;
            }
        }
        let twin = members[rep]
            .iter()
            .copied()
            .find(|&m| mesh.vertices[m] == mesh.vertices[i]);
        match twin {
            Some(m) => {
                remap[i] = m;
                report.merged += 1;
            }
            None => members[rep].push(i),
        }
    }

    let before = mesh.triangle_count();
    let mut kept = Vec::with_capacity(before);
    for (old, t) in mesh.triangles.iter().enumerate() {
        let welded = Triangle::new(t.indices.map(|i| remap[i]), t.material);
        if welded.is_degenerate() {
            report.triangle_map[old] = None;
        } else {
            report.triangle_map[old] = Some(kept.len());
            kept.push(welded);
        }
    }
    mesh.triangles = kept;
    report.degenerate_triangles = before - mesh.triangle_count();
    mesh.compact();

    debug!(
        snapped = report.snapped,
        merged = report.merged,
        degenerate = report.degenerate_triangles,
        "welded vertices"
    );
    report
}
