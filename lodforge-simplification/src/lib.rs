//! Mesh simplification for lodforge
//!
//! This crate reduces triangle counts while preserving appearance:
//! - Quadric error metric edge collapse with seam, material boundary,
//!   skin discontinuity and locked region constraints
//! - Vertex welding as an optional pre-pass

pub mod quadric;
pub mod constraints;
pub mod edge_collapse;
pub mod weld;

pub use quadric::*;
pub use constraints::*;
pub use edge_collapse::*;
pub use weld::*;

use lodforge_core::{CancelToken, Mesh, Result};

/// A simplified mesh with the statistics of the run that produced it
#[derive(Debug, Clone)]
pub struct Simplified {
    pub mesh: Mesh,
    pub report: SimplifyReport,
}

/// Simplify a mesh down to the simplifier's configured target
pub trait MeshSimplifier {
    fn simplify(&self, mesh: &Mesh, cancel: &CancelToken) -> Result<Simplified>;
}
