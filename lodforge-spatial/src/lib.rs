//! Spatial queries over triangle meshes
//!
//! This crate provides a bounding volume hierarchy over the triangles of a
//! [`Mesh`](lodforge_core::Mesh), supporting:
//! - Ray casts and two-sided line queries limited to a cage distance
//! - Closest surface point queries
//! - Range queries against axis-aligned boxes
//! - Barycentric interpolation of vertex attributes at a hit

pub mod bvh;
pub mod intersect;
pub mod sample;

pub use bvh::*;
pub use intersect::*;
pub use sample::*;
