//! Attribute interpolation at surface points

use lodforge_core::{Mesh, Point2f, Point3f, Vector3f, Vector4f};

/// Interpolated attributes of a mesh at a point on one of its triangles
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSample {
    pub triangle: usize,
    pub barycentric: [f32; 3],
    pub position: Point3f,
    /// Interpolated shading normal, falling back to the face normal
    pub normal: Vector3f,
    /// Face normal, zero for degenerate triangles
    pub geometric_normal: Vector3f,
    pub tangent: Vector4f,
    pub uv: Point2f,
    pub material: usize,
}

/// Interpolate vertex attributes of `triangle` at `barycentric`.
///
/// `uv_channel` selects the interpolated UV set; missing channels yield the
/// origin.
pub fn interpolate_surface(
    mesh: &Mesh,
    triangle: usize,
    barycentric: [f32; 3],
    uv_channel: usize,
) -> SurfaceSample {
    let tri = &mesh.triangles[triangle];
    let [w0, w1, w2] = barycentric;
    let [a, b, c] = tri.indices.map(|i| &mesh.vertices[i]);

    let position = Point3f::from(a.position.coords * w0 + b.position.coords * w1 + c.position.coords * w2);
    let geometric_normal = mesh.triangle_normal(triangle).unwrap_or_else(Vector3f::zeros);
    let normal = (a.normal * w0 + b.normal * w1 + c.normal * w2)
        .try_normalize(f32::EPSILON)
        .unwrap_or(geometric_normal);
    let tangent = a.tangent * w0 + b.tangent * w1 + c.tangent * w2;
    let tangent_dir = tangent.xyz().try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::x);
    let handedness = if a.tangent.w < 0.0 { -1.0 } else { 1.0 };
    let (ua, ub, uc) = (a.uv(uv_channel), b.uv(uv_channel), c.uv(uv_channel));
    let uv = Point2f::from(ua.coords * w0 + ub.coords * w1 + uc.coords * w2);

    SurfaceSample {
        triangle,
        barycentric,
        position,
        normal,
        geometric_normal,
        tangent: Vector4f::new(tangent_dir.x, tangent_dir.y, tangent_dir.z, handedness),
        uv,
        material: tri.material,
    }
}
