//! Normal and tangent recalculation

use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::point::*;
use std::collections::HashMap;

/// Bit-exact key for grouping coincident vertices
pub fn position_key(p: &Point3f) -> [u32; 3] {
    // +0.0 and -0.0 must hash alike
    [
        (p.x + 0.0).to_bits(),
        (p.y + 0.0).to_bits(),
        (p.z + 0.0).to_bits(),
    ]
}

/// Corner angles of a triangle, in radians
fn corner_angles(p: &[Point3f; 3]) -> [f32; 3] {
    let mut angles = [0.0; 3];
    for i in 0..3 {
        let a = p[(i + 1) % 3] - p[i];
        let b = p[(i + 2) % 3] - p[i];
        let denom = a.norm() * b.norm();
        angles[i] = if denom > 0.0 {
            (a.dot(&b) / denom).clamp(-1.0, 1.0).acos()
        } else {
            0.0
        };
    }
    angles
}

/// Recompute vertex normals as angle-weighted averages of face normals.
///
/// Vertices at the same position share contributions, so normals stay
/// smooth across UV seams. A face only contributes to a vertex when its
/// normal lies within `hard_angle_degrees` of the vertex's own faces, which
/// keeps hard edges hard. Normals that cannot be computed are left as is.
pub fn recalculate_normals(mesh: &mut Mesh, hard_angle_degrees: f32) {
    let cos_hard = hard_angle_degrees.to_radians().cos();
    let face_normals: Vec<Option<Vector3f>> =
        (0..mesh.triangle_count()).map(|t| mesh.triangle_normal(t)).collect();

    let mut vertex_faces: Vec<Vec<(usize, f32)>> = vec![Vec::new(); mesh.vertex_count()];
    for (t, tri) in mesh.triangles.iter().enumerate() {
        let angles = corner_angles(&mesh.triangle_positions(t));
        for (corner, &v) in tri.indices.iter().enumerate() {
            vertex_faces[v].push((t, angles[corner]));
        }
    }

    let mut groups: HashMap<[u32; 3], Vec<usize>> = HashMap::new();
    for (i, v) in mesh.vertices.iter().enumerate() {
        groups.entry(position_key(&v.position)).or_default().push(i);
    }

    let mut normals: Vec<Option<Vector3f>> = vec![None; mesh.vertex_count()];
    for members in groups.values() {
        for &v in members {
            let mut reference = Vector3f::zeros();
            for &(t, angle) in &vertex_faces[v] {
                if let Some(n) = face_normals[t] {
                    reference += n * angle;
                }
            }
            let Some(reference) = reference.try_normalize(f32::EPSILON) else {
                continue;
            };

            let mut sum = Vector3f::zeros();
            for &other in members {
                for &(t, angle) in &vertex_faces[other] {
                    if let Some(n) = face_normals[t] {
                        if n.dot(&reference) >= cos_hard - 1e-6 {
                            sum += n * angle;
                        }
                    }
                }
            }
            normals[v] = Some(sum.try_normalize(f32::EPSILON).unwrap_or(reference));
        }
    }

    for (vertex, normal) in mesh.vertices.iter_mut().zip(normals) {
        if let Some(n) = normal {
            vertex.normal = n;
        }
    }
}

/// Any unit vector perpendicular to `n`
fn orthogonal(n: &Vector3f) -> Vector3f {
    let axis = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    (axis - n * n.dot(&axis)).try_normalize(f32::EPSILON).unwrap_or(axis)
}

/// Recompute per-vertex tangents from the UV gradients of `uv_channel`.
///
/// Tangents are Gram-Schmidt orthogonalised against the vertex normal and
/// the bitangent sign is stored in `w`.
pub fn recalculate_tangents(mesh: &mut Mesh, uv_channel: usize) -> Result<()> {
    if uv_channel >= mesh.uv_channel_count() {
        return Err(Error::InvalidInput(format!(
            "UV channel {} does not exist, mesh has {}",
            uv_channel,
            mesh.uv_channel_count()
        )));
    }

    let mut tan = vec![Vector3f::zeros(); mesh.vertex_count()];
    let mut bitan = vec![Vector3f::zeros(); mesh.vertex_count()];

    for (t, tri) in mesh.triangles.iter().enumerate() {
        let [p0, p1, p2] = mesh.triangle_positions(t);
        let [uv0, uv1, uv2] = mesh.triangle_uvs(t, uv_channel);
        let e1 = p1 - p0;
        let e2 = p2 - p0;
        let d1 = uv1 - uv0;
        let d2 = uv2 - uv0;
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let sdir = (e1 * d2.y - e2 * d1.y) * r;
        let tdir = (e2 * d1.x - e1 * d2.x) * r;
        for &i in &tri.indices {
            tan[i] += sdir;
            bitan[i] += tdir;
        }
    }

    for (i, vertex) in mesh.vertices.iter_mut().enumerate() {
        let n = vertex.normal;
        let t = (tan[i] - n * n.dot(&tan[i]))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| orthogonal(&n));
        let w = if n.cross(&t).dot(&bitan[i]) < 0.0 { -1.0 } else { 1.0 };
        vertex.tangent = Vector4f::new(t.x, t.y, t.z, w);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Triangle, Vertex};
    use crate::material::MaterialSlot;
    use approx::assert_relative_eq;

    /// Two quads meeting at a right angle along the x axis, unshared vertices
    fn make_hinge() -> Mesh {
        let v = |x: f32, y: f32, z: f32, u: f32, w: f32| {
            Vertex::new(Point3f::new(x, y, z)).with_uv(Point2f::new(u, w))
        };
        let vertices = vec![
            // floor, z = 0
            v(0.0, 0.0, 0.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0, 1.0, 0.0),
            v(1.0, 1.0, 0.0, 1.0, 1.0),
            v(0.0, 1.0, 0.0, 0.0, 1.0),
            // wall, y = 0
            v(0.0, 0.0, 0.0, 0.0, 0.0),
            v(0.0, 0.0, 1.0, 0.0, 1.0),
            v(1.0, 0.0, 1.0, 1.0, 1.0),
            v(1.0, 0.0, 0.0, 1.0, 0.0),
        ];
        let triangles = vec![
            Triangle::new([0, 1, 2], 0),
            Triangle::new([0, 2, 3], 0),
            Triangle::new([4, 5, 6], 0),
            Triangle::new([4, 6, 7], 0),
        ];
        Mesh::from_parts(vertices, triangles, vec![MaterialSlot::default()])
    }

    #[test]
    fn test_hard_edge_kept() {
        let mut mesh = make_hinge();
        recalculate_normals(&mut mesh, 60.0);
        assert_relative_eq!(mesh.vertices[0].normal.z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(mesh.vertices[4].normal.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_soft_edge_smoothed() {
        let mut mesh = make_hinge();
        recalculate_normals(&mut mesh, 120.0);
        let n = mesh.vertices[0].normal;
        assert!(n.z > 0.1 && n.y > 0.1);
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-5);
        // coincident vertices agree
        assert_relative_eq!(mesh.vertices[0].normal, mesh.vertices[4].normal, epsilon = 1e-5);
    }

    #[test]
    fn test_tangents_follow_u() {
        let mut mesh = make_hinge();
        recalculate_normals(&mut mesh, 60.0);
        recalculate_tangents(&mut mesh, 0).unwrap();
        let t = mesh.vertices[1].tangent;
        assert_relative_eq!(t.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(t.w.abs(), 1.0);
        assert!(recalculate_tangents(&mut mesh, 3).is_err());
    }
}
