//! Mesh data structures and functionality

use crate::attributes::recalculate_normals;
use crate::bounds::Aabb;
use crate::error::{Error, Result};
use crate::material::MaterialSlot;
use crate::point::*;
use crate::traits::Bounded;
use serde::{Deserialize, Serialize};

/// Tolerance on the sum of a vertex's skin weights
pub const SKIN_WEIGHT_TOLERANCE: f32 = 1e-3;

/// A mesh vertex with shading, texturing and skinning attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub position: Point3f,
    pub normal: Vector3f,
    /// Tangent direction in xyz, bitangent sign in w
    pub tangent: Vector4f,
    /// One entry per UV channel
    pub uvs: Vec<Point2f>,
    /// Bone influences, empty for static meshes
    pub skin: Vec<BoneInfluence>,
}

impl Vertex {
    pub fn new(position: Point3f) -> Self {
        Self {
            position,
            normal: Vector3f::z(),
            tangent: Vector4f::new(1.0, 0.0, 0.0, 1.0),
            uvs: Vec::new(),
            skin: Vec::new(),
        }
    }

    pub fn with_normal(mut self, normal: Vector3f) -> Self {
        self.normal = normal;
        self
    }

    pub fn with_uv(mut self, uv: Point2f) -> Self {
        self.uvs.push(uv);
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<Point2f>) -> Self {
        self.uvs = uvs;
        self
    }

    pub fn with_skin(mut self, skin: Vec<BoneInfluence>) -> Self {
        self.skin = skin;
        self
    }

    /// UV of the given channel, or the origin when the channel is missing
    pub fn uv(&self, channel: usize) -> Point2f {
        self.uvs.get(channel).copied().unwrap_or_else(Point2f::origin)
    }
}

/// A triangle referencing three vertices and a material slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triangle {
    pub indices: [usize; 3],
    pub material: usize,
}

impl Triangle {
    pub fn new(indices: [usize; 3], material: usize) -> Self {
        Self { indices, material }
    }

    /// True when two corners share a vertex index
    pub fn is_degenerate(&self) -> bool {
        let [a, b, c] = self.indices;
        a == b || b == c || a == c
    }
}

/// A triangle mesh with per-vertex attributes and a material slot table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub material_slots: Vec<MaterialSlot>,
}

impl Mesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        vertices: Vec<Vertex>,
        triangles: Vec<Triangle>,
        material_slots: Vec<MaterialSlot>,
    ) -> Self {
        Self {
            vertices,
            triangles,
            material_slots,
        }
    }

    /// Build a mesh from bare positions and faces.
    ///
    /// All faces use a single default material slot and smooth normals are
    /// computed. No UV channels are created.
    pub fn from_positions(positions: Vec<Point3f>, faces: Vec<[usize; 3]>) -> Self {
        let vertices = positions.into_iter().map(Vertex::new).collect();
        let triangles = faces.into_iter().map(|f| Triangle::new(f, 0)).collect();
        let mut mesh = Self::from_parts(vertices, triangles, vec![MaterialSlot::default()]);
        recalculate_normals(&mut mesh, 180.0);
        mesh
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.triangles.is_empty()
    }

    /// Number of UV channels, taken from the first vertex
    pub fn uv_channel_count(&self) -> usize {
        self.vertices.first().map_or(0, |v| v.uvs.len())
    }

    pub fn is_skinned(&self) -> bool {
        self.vertices.iter().any(|v| !v.skin.is_empty())
    }

    pub fn triangle_positions(&self, triangle: usize) -> [Point3f; 3] {
        let [a, b, c] = self.triangles[triangle].indices;
        [
            self.vertices[a].position,
            self.vertices[b].position,
            self.vertices[c].position,
        ]
    }

    pub fn triangle_uvs(&self, triangle: usize, channel: usize) -> [Point2f; 3] {
        let [a, b, c] = self.triangles[triangle].indices;
        [
            self.vertices[a].uv(channel),
            self.vertices[b].uv(channel),
            self.vertices[c].uv(channel),
        ]
    }

    /// Unit normal of a triangle, `None` for zero-area triangles
    pub fn triangle_normal(&self, triangle: usize) -> Option<Vector3f> {
        let [p0, p1, p2] = self.triangle_positions(triangle);
        let n = (p1 - p0).cross(&(p2 - p0));
        let len = n.norm();
        if len > f32::EPSILON * 16.0 && len.is_finite() {
            Some(n / len)
        } else {
            None
        }
    }

    pub fn triangle_area(&self, triangle: usize) -> f32 {
        let [p0, p1, p2] = self.triangle_positions(triangle);
        0.5 * (p1 - p0).cross(&(p2 - p0)).norm()
    }

    pub fn surface_area(&self) -> f32 {
        (0..self.triangles.len()).map(|t| self.triangle_area(t)).sum()
    }

    /// Drop vertices no triangle references and reindex.
    ///
    /// Returns the old-to-new index map (`None` for removed vertices).
    pub fn compact(&mut self) -> Vec<Option<usize>> {
        let mut remap = vec![None; self.vertices.len()];
        let mut next = 0;
        for tri in &self.triangles {
            for &i in &tri.indices {
                if remap[i].is_none() {
                    remap[i] = Some(next);
                    next += 1;
                }
            }
        }

        let mut vertices = vec![None; next];
        for (old, vertex) in self.vertices.drain(..).enumerate() {
            if let Some(new) = remap[old] {
                vertices[new] = Some(vertex);
            }
        }
        self.vertices = vertices.into_iter().flatten().collect();

        for tri in &mut self.triangles {
            for i in &mut tri.indices {
                if let Some(new) = remap[*i] {
                    *i = new;
                }
            }
        }
        remap
    }

    /// Check the structural invariants of the mesh.
    pub fn validate(&self) -> Result<()> {
        let uv_channels = self.uv_channel_count();

        for (i, v) in self.vertices.iter().enumerate() {
            if !v.position.coords.iter().all(|c| c.is_finite()) {
                return Err(Error::InvalidInput(format!("vertex {} has a non-finite position", i)));
            }
            if !v.normal.iter().all(|c| c.is_finite()) || !v.tangent.iter().all(|c| c.is_finite()) {
                return Err(Error::InvalidInput(format!(
                    "vertex {} has a non-finite normal or tangent",
                    i
                )));
            }
            if v.uvs.len() != uv_channels {
                return Err(Error::InvalidInput(format!(
                    "vertex {} has {} UV channels, expected {}",
                    i,
                    v.uvs.len(),
                    uv_channels
                )));
            }
            if !v.uvs.iter().all(|uv| uv.x.is_finite() && uv.y.is_finite()) {
                return Err(Error::InvalidInput(format!("vertex {} has a non-finite UV", i)));
            }
            if !v.skin.is_empty() {
                if v.skin.iter().any(|b| b.weight < 0.0 || !b.weight.is_finite()) {
                    return Err(Error::InvalidInput(format!(
                        "vertex {} has a negative skin weight",
                        i
                    )));
                }
                let sum = skin_weight_sum(&v.skin);
                if (sum - 1.0).abs() > SKIN_WEIGHT_TOLERANCE {
                    return Err(Error::InvalidInput(format!(
                        "vertex {} skin weights sum to {}",
                        i, sum
                    )));
                }
            }
        }

        for (t, tri) in self.triangles.iter().enumerate() {
            if let Some(&bad) = tri.indices.iter().find(|&&i| i >= self.vertices.len()) {
                return Err(Error::InvalidInput(format!(
                    "triangle {} references vertex {} but the mesh has {} vertices",
                    t,
                    bad,
                    self.vertices.len()
                )));
            }
            if tri.material >= self.material_slots.len() {
                return Err(Error::InvalidInput(format!(
                    "triangle {} uses material slot {} but the mesh has {} slots",
                    t,
                    tri.material,
                    self.material_slots.len()
                )));
            }
        }

        Ok(())
    }
}

impl Bounded for Mesh {
    fn bounding_box(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }
}
