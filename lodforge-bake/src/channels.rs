//! Bake output channels and their per-sample evaluation

use lodforge_core::{Aabb, ChannelSource, MaterialChannel, Mesh, TextureFilter, Vector3f};
use lodforge_spatial::{RayHit, SurfaceSample};
use serde::{Deserialize, Serialize};

/// A texture produced by the baker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BakeChannel {
    Albedo,
    /// Source shading normal in the target's tangent frame
    TangentNormal,
    /// Source shading normal in object space
    ObjectNormal,
    Roughness,
    Metallic,
    Specular,
    Emissive,
    Opacity,
    AmbientOcclusion,
    /// Hit position normalised by the source bounding box
    Position,
    /// Signed hit distance over the cage distance, mapped to `[0, 1]`
    Displacement,
    /// Material slot index of the source triangle
    MaterialId,
}

impl BakeChannel {
    pub const ALL: [BakeChannel; 12] = [
        BakeChannel::Albedo,
        BakeChannel::TangentNormal,
        BakeChannel::ObjectNormal,
        BakeChannel::Roughness,
        BakeChannel::Metallic,
        BakeChannel::Specular,
        BakeChannel::Emissive,
        BakeChannel::Opacity,
        BakeChannel::AmbientOcclusion,
        BakeChannel::Position,
        BakeChannel::Displacement,
        BakeChannel::MaterialId,
    ];

    /// Material input copied straight through, if any
    pub fn material_channel(self) -> Option<MaterialChannel> {
        match self {
            BakeChannel::Albedo => Some(MaterialChannel::Albedo),
            BakeChannel::Roughness => Some(MaterialChannel::Roughness),
            BakeChannel::Metallic => Some(MaterialChannel::Metallic),
            BakeChannel::Specular => Some(MaterialChannel::Specular),
            BakeChannel::Emissive => Some(MaterialChannel::Emissive),
            BakeChannel::Opacity => Some(MaterialChannel::Opacity),
            BakeChannel::AmbientOcclusion => Some(MaterialChannel::AmbientOcclusion),
            _ => None,
        }
    }

    /// Whether supersamples are averaged; identifiers keep the first hit
    pub fn is_averaged(self) -> bool {
        self != BakeChannel::MaterialId
    }
}

/// Map a unit vector from `[-1, 1]` to `[0, 1]`
pub fn encode_normal(n: &Vector3f) -> [f32; 4] {
    [n.x * 0.5 + 0.5, n.y * 0.5 + 0.5, n.z * 0.5 + 0.5, 1.0]
}

/// Inverse of [`encode_normal`]
pub fn decode_normal(rgba: [f32; 4]) -> Vector3f {
    Vector3f::new(rgba[0] * 2.0 - 1.0, rgba[1] * 2.0 - 1.0, rgba[2] * 2.0 - 1.0)
}

/// Orthonormal tangent frame `(t, b, n)` of a surface sample
fn tangent_frame(sample: &SurfaceSample) -> (Vector3f, Vector3f, Vector3f) {
    let n = sample.normal;
    let t = sample.tangent.xyz();
    let t = (t - n * n.dot(&t))
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(|| {
            let helper = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
            (helper - n * n.dot(&helper)).normalize()
        });
    let b = n.cross(&t) * sample.tangent.w;
    (t, b, n)
}

/// Everything a channel needs to turn a source hit into a value
pub struct SampleContext<'a> {
    pub source: &'a Mesh,
    pub source_bounds: &'a Aabb,
    pub filter: TextureFilter,
    pub cage_distance: f32,
}

impl SampleContext<'_> {
    /// Object space shading normal at a source sample, including its normal map
    pub fn source_normal(&self, hit: &SurfaceSample) -> Vector3f {
        let slot = &self.source.material_slots[hit.material];
        match slot.channels.get(&MaterialChannel::Normal) {
            Some(ChannelSource::Texture(texture)) => {
                let local = decode_normal(texture.sample(hit.uv, self.filter));
                let (t, b, n) = tangent_frame(hit);
                (t * local.x + b * local.y + n * local.z)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or(n)
            }
            _ => hit.normal,
        }
    }

    /// Value of `channel` for one supersample
    pub fn evaluate(
        &self,
        channel: BakeChannel,
        target: &SurfaceSample,
        ray: &RayHit,
        hit: &SurfaceSample,
    ) -> [f32; 4] {
        match channel {
            BakeChannel::ObjectNormal => encode_normal(&self.source_normal(hit)),
            BakeChannel::TangentNormal => {
                let world = self.source_normal(hit);
                let (t, b, n) = tangent_frame(target);
                let local = Vector3f::new(world.dot(&t), world.dot(&b), world.dot(&n));
                encode_normal(&local.try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z))
            }
            BakeChannel::Position => {
                let p = self.source_bounds.normalize_point(&ray.point);
                [p.x, p.y, p.z, 1.0]
            }
            BakeChannel::Displacement => {
                let d = (ray.t / self.cage_distance * 0.5 + 0.5).clamp(0.0, 1.0);
                [d, d, d, 1.0]
            }
            BakeChannel::MaterialId => {
                let id = hit.material as f32;
                [id, id, id, 1.0]
            }
            material => {
                let slot = &self.source.material_slots[hit.material];
                material
                    .material_channel()
                    .map(|c| slot.sample(c, hit.uv, self.filter))
                    .unwrap_or([0.0; 4])
            }
        }
    }
}
