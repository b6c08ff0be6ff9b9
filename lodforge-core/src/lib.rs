//! Core data structures and traits for lodforge
//!
//! This crate provides the fundamental types shared by every stage of the
//! LOD pipeline: vertices with skinning and UV attributes, triangle meshes
//! with material slot tables, textures, bounding boxes and cancellation.

pub mod point;
pub mod bounds;
pub mod mesh;
pub mod material;
pub mod texture;
pub mod attributes;
pub mod traits;
pub mod cancel;
pub mod error;

pub use point::*;
pub use bounds::*;
pub use mesh::*;
pub use material::*;
pub use texture::*;
pub use attributes::*;
pub use traits::*;
pub use cancel::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point2, Point3, Vector2, Vector3, Vector4, Matrix3, Matrix4};
