//! Vertex constraints for edge collapse
//!
//! A constrained vertex never moves and never disappears. Collapses may only
//! pull a free neighbour onto it; an edge between two constrained vertices
//! is never collapsed. Vertices sharing a position with another vertex are
//! always constrained, whatever attribute splits them, so the surface cannot
//! tear along hard edges or seams.

use crate::edge_collapse::SimplifyOptions;
use itertools::Itertools;
use lodforge_core::{position_key, Error, Mesh, Result};
use std::collections::HashMap;

/// Per-vertex constraint flags plus per-kind counts for logging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexConstraints {
    pub constrained: Vec<bool>,
    pub uv_seam: usize,
    pub skin_discontinuity: usize,
    pub material_boundary: usize,
    pub locked: usize,
    pub open_boundary: usize,
    /// Coincident copies that differ only in attributes nothing else preserves
    pub attribute_split: usize,
}

impl VertexConstraints {
    pub fn constrained_count(&self) -> usize {
        self.constrained.iter().filter(|&&c| c).count()
    }
}

/// Groups of vertex indices sharing an exact position
pub fn coincident_groups(mesh: &Mesh) -> Vec<Vec<usize>> {
    let mut groups: HashMap<[u32; 3], Vec<usize>> = HashMap::new();
    for (i, v) in mesh.vertices.iter().enumerate() {
        groups.entry(position_key(&v.position)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_unstable_by_key(|g| g[0]);
    groups
}

/// Open boundary edges as `(triangle, v0, v1)`.
///
/// Edges are matched by position so that vertices split along UV seams do
/// not count as boundaries.
pub fn open_boundary_edges(mesh: &Mesh) -> Vec<(usize, usize, usize)> {
    let mut edges: HashMap<([u32; 3], [u32; 3]), (usize, usize, usize, usize)> = HashMap::new();
    for (t, tri) in mesh.triangles.iter().enumerate() {
        for k in 0..3 {
            let a = tri.indices[k];
            let b = tri.indices[(k + 1) % 3];
            let ka = position_key(&mesh.vertices[a].position);
            let kb = position_key(&mesh.vertices[b].position);
            if ka == kb {
                continue;
            }
            let key = if ka < kb { (ka, kb) } else { (kb, ka) };
            edges
                .entry(key)
                .and_modify(|e| e.3 += 1)
                .or_insert((t, a, b, 1));
        }
    }
    let mut open: Vec<(usize, usize, usize)> = edges
        .into_values()
        .filter(|e| e.3 == 1)
        .map(|(t, a, b, _)| (t, a, b))
        .collect();
    open.sort_unstable();
    open
}

fn mark(members: &[usize], constrained: &mut [bool]) {
    for &m in members {
        constrained[m] = true;
    }
}

/// Classify every vertex of `mesh` against the preservation options
pub fn classify_vertices(mesh: &Mesh, options: &SimplifyOptions) -> Result<VertexConstraints> {
    let n = mesh.vertex_count();
    let mut out = VertexConstraints {
        constrained: vec![false; n],
        ..Default::default()
    };
    let groups = coincident_groups(mesh);

    let mut vertex_materials: Vec<Vec<usize>> = vec![Vec::new(); n];
    for tri in &mesh.triangles {
        for &v in &tri.indices {
            vertex_materials[v].push(tri.material);
        }
    }

    for members in &groups {
        if options.preserve_uv_seams
            && members.len() > 1
            && !members.iter().map(|&i| &mesh.vertices[i].uvs).all_equal()
        {
            out.uv_seam += members.len();
            mark(members, &mut out.constrained);
        }
        if options.preserve_skin_discontinuities
            && members.len() > 1
            && !members.iter().map(|&i| &mesh.vertices[i].skin).all_equal()
        {
            out.skin_discontinuity += members.len();
            mark(members, &mut out.constrained);
        }
        if options.preserve_material_boundaries
            && !members
                .iter()
                .flat_map(|&i| vertex_materials[i].iter())
                .all_equal()
        {
            out.material_boundary += members.len();
            mark(members, &mut out.constrained);
        }
        // copies of one position collapse independently, so they must stay put
        if members.len() > 1 && !members.iter().any(|&m| out.constrained[m]) {
            out.attribute_split += members.len();
            mark(members, &mut out.constrained);
        }
    }

    if !options.locked_regions.is_empty() {
        let group_of: HashMap<usize, usize> = groups
            .iter()
            .enumerate()
            .flat_map(|(g, members)| members.iter().map(move |&m| (m, g)))
            .collect();
        for region in &options.locked_regions {
            for &t in region {
                let tri = mesh.triangles.get(t).ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "locked region references triangle {} but the mesh has {}",
                        t,
                        mesh.triangle_count()
                    ))
                })?;
                for v in tri.indices {
                    let members = &groups[group_of[&v]];
                    out.locked += members.len();
                    mark(members, &mut out.constrained);
                }
            }
        }
    }

    if options.lock_boundaries {
        let group_of: HashMap<[u32; 3], usize> = groups
            .iter()
            .enumerate()
            .map(|(g, members)| (position_key(&mesh.vertices[members[0]].position), g))
            .collect();
        for (_, a, b) in open_boundary_edges(mesh) {
            for v in [a, b] {
                let members = &groups[group_of[&position_key(&mesh.vertices[v].position)]];
                out.open_boundary += members.len();
                mark(members, &mut out.constrained);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodforge_core::{MaterialSlot, Point2f, Point3f, Triangle, Vector3f, Vertex};

    /// Two triangles sharing the diagonal of a unit square, split along it
    fn make_split_square(uv_offset: f32) -> Mesh {
        let v = |x: f32, y: f32, u: f32| Vertex::new(Point3f::new(x, y, 0.0)).with_uv(Point2f::new(u, y));
        let vertices = vec![
            v(0.0, 0.0, 0.0),
            v(1.0, 0.0, 1.0),
            v(1.0, 1.0, 1.0),
            v(0.0, 0.0, uv_offset),
            v(1.0, 1.0, 1.0 + uv_offset),
            v(0.0, 1.0, uv_offset),
        ];
        let triangles = vec![Triangle::new([0, 1, 2], 0), Triangle::new([3, 4, 5], 1)];
        Mesh::from_parts(
            vertices,
            triangles,
            vec![MaterialSlot::new("a"), MaterialSlot::new("b")],
        )
    }

    fn no_constraints() -> SimplifyOptions {
        SimplifyOptions::default()
            .with_preserve_uv_seams(false)
            .with_preserve_material_boundaries(false)
            .with_preserve_skin_discontinuities(false)
    }

    #[test]
    fn test_uv_seam_detection() {
        let mesh = make_split_square(0.5);
        let options = no_constraints().with_preserve_uv_seams(true);
        let c = classify_vertices(&mesh, &options).unwrap();
        assert_eq!(c.constrained, vec![true, false, true, true, true, false]);
        assert_eq!(c.uv_seam, 4);

        // identical UVs on both sides: not a seam, but still a split
        let mesh = make_split_square(0.0);
        let c = classify_vertices(&mesh, &options).unwrap();
        assert_eq!(c.uv_seam, 0);
        assert_eq!(c.attribute_split, 4);
        assert_eq!(c.constrained, vec![true, false, true, true, true, false]);
    }

    #[test]
    fn test_normal_split_is_constrained() {
        let mut mesh = make_split_square(0.0);
        mesh.vertices[3].normal = Vector3f::new(0.6, 0.0, 0.8);
        mesh.vertices[4].normal = Vector3f::new(0.6, 0.0, 0.8);
        let c = classify_vertices(&mesh, &SimplifyOptions::default()).unwrap();
        // both materials differ too, so the split counts as a material boundary
        assert_eq!(c.attribute_split, 0);
        assert_eq!(c.constrained_count(), 4);

        let c = classify_vertices(&mesh, &no_constraints()).unwrap();
        assert_eq!(c.attribute_split, 4);
        assert_eq!(c.constrained, vec![true, false, true, true, true, false]);
    }

    #[test]
    fn test_material_boundary_detection() {
        let mesh = make_split_square(0.0);
        let options = no_constraints().with_preserve_material_boundaries(true);
        let c = classify_vertices(&mesh, &options).unwrap();
        assert_eq!(c.constrained, vec![true, false, true, true, true, false]);
    }

    #[test]
    fn test_open_boundary() {
        let mesh = make_split_square(0.5);
        // the split diagonal is matched by position, leaving the four sides
        assert_eq!(open_boundary_edges(&mesh).len(), 4);

        let options = no_constraints().with_lock_boundaries(true);
        let c = classify_vertices(&mesh, &options).unwrap();
        assert_eq!(c.constrained_count(), 6);
    }

    #[test]
    fn test_locked_region_out_of_range() {
        let mesh = make_split_square(0.0);
        let options = no_constraints().with_locked_regions(vec![vec![7]]);
        assert!(matches!(
            classify_vertices(&mesh, &options),
            Err(Error::InvalidConfig(_))
        ));

        let options = no_constraints().with_locked_regions(vec![vec![0]]);
        let c = classify_vertices(&mesh, &options).unwrap();
        // triangle 0 plus the coincident copies of its corners
        assert_eq!(c.constrained, vec![true, true, true, true, true, false]);
    }
}
