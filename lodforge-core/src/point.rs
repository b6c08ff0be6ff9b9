//! Point, vector and skinning types

use bytemuck::{Pod, Zeroable};
use nalgebra::{Point2, Point3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// A 2D point, used for texture coordinates
pub type Point2f = Point2<f32>;

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A 4D vector, used for tangents (xyz = direction, w = bitangent sign)
pub type Vector4f = Vector4<f32>;

/// Weights below this value are dropped when skin weights are blended
pub const MIN_BONE_WEIGHT: f32 = 1e-4;

/// A single bone influence on a vertex
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct BoneInfluence {
    pub bone: u32,
    pub weight: f32,
}

impl BoneInfluence {
    pub fn new(bone: u32, weight: f32) -> Self {
        Self { bone, weight }
    }
}

/// Sum of the weights of an influence list
pub fn skin_weight_sum(skin: &[BoneInfluence]) -> f32 {
    skin.iter().map(|b| b.weight).sum()
}

/// Blend two influence lists as `(1 - t) * a + t * b`.
///
/// Influences on the same bone are merged, weights below
/// [`MIN_BONE_WEIGHT`] dropped, the list is sorted by descending weight,
/// capped at `max_influences` (0 = unlimited) and renormalised to 1.
pub fn blend_skin_weights(
    a: &[BoneInfluence],
    b: &[BoneInfluence],
    t: f32,
    max_influences: usize,
) -> Vec<BoneInfluence> {
    let mut merged: Vec<BoneInfluence> = Vec::with_capacity(a.len() + b.len());
    let mut accumulate = |bone: u32, weight: f32| {
        match merged.iter_mut().find(|inf| inf.bone == bone) {
            Some(inf) => inf.weight += weight,
            None => merged.push(BoneInfluence::new(bone, weight)),
        }
    };
    for inf in a {
        accumulate(inf.bone, inf.weight * (1.0 - t));
    }
    for inf in b {
        accumulate(inf.bone, inf.weight * t);
    }
    normalize_skin_weights(merged, max_influences)
}

/// Drop negligible influences, cap the count and renormalise to sum to 1.
pub fn normalize_skin_weights(
    mut skin: Vec<BoneInfluence>,
    max_influences: usize,
) -> Vec<BoneInfluence> {
    skin.retain(|inf| inf.weight >= MIN_BONE_WEIGHT);
    skin.sort_by(|x, y| y.weight.total_cmp(&x.weight).then(x.bone.cmp(&y.bone)));
    if max_influences > 0 && skin.len() > max_influences {
        skin.truncate(max_influences);
    }
    let total = skin_weight_sum(&skin);
    if total > 0.0 {
        for inf in &mut skin {
            inf.weight /= total;
        }
    }
    skin
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_blend_merges_shared_bones() {
        let a = vec![BoneInfluence::new(0, 0.5), BoneInfluence::new(1, 0.5)];
        let b = vec![BoneInfluence::new(1, 1.0)];
        let blended = blend_skin_weights(&a, &b, 0.5, 0);
        assert_eq!(blended.len(), 2);
        assert_eq!(blended[0].bone, 1);
        assert_relative_eq!(blended[0].weight, 0.75, epsilon = 1e-6);
        assert_relative_eq!(skin_weight_sum(&blended), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_blend_drops_tiny_weights() {
        let a = vec![BoneInfluence::new(0, 1.0)];
        let b = vec![BoneInfluence::new(3, 1.0)];
        let blended = blend_skin_weights(&a, &b, 0.00001, 0);
        assert_eq!(blended.len(), 1);
        assert_eq!(blended[0].bone, 0);
        assert_relative_eq!(blended[0].weight, 1.0);
    }

    #[test]
    fn test_normalize_caps_influences() {
        let skin = vec![
            BoneInfluence::new(0, 0.4),
            BoneInfluence::new(1, 0.3),
            BoneInfluence::new(2, 0.2),
            BoneInfluence::new(3, 0.1),
        ];
        let capped = normalize_skin_weights(skin, 2);
        assert_eq!(capped.len(), 2);
        assert_relative_eq!(skin_weight_sum(&capped), 1.0, epsilon = 1e-6);
        assert_relative_eq!(capped[0].weight, 0.4 / 0.7, epsilon = 1e-6);
    }
}
