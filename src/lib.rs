//! # lodforge
//!
//! Level-of-detail generation for textured, skinned triangle meshes.
//!
//! This is the umbrella crate that gathers the lodforge crates behind one
//! dependency. Use the individual crates for finer control over what gets
//! compiled.
//!
//! ## Features
//!
//! - **Core**: Mesh, material, texture and cancellation types
//! - **Spatial**: Triangle BVH with ray, line and closest-point queries
//! - **Simplification**: Quadric edge collapse with seam and skin constraints
//! - **Unwrap**: Chart segmentation, LSCM flattening and atlas packing
//! - **Bake**: Re-baking source materials onto the simplified surface
//! - **Pipeline**: Configured LOD jobs with progress events and cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lodforge::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let positions = vec![
//!     Point3f::new(0.0, 0.0, 0.0),
//!     Point3f::new(1.0, 0.0, 0.0),
//!     Point3f::new(1.0, 1.0, 0.0),
//!     Point3f::new(0.0, 1.0, 0.0),
//! ];
//! let mesh = Mesh::from_positions(positions, vec![[0, 1, 2], [0, 2, 3]]);
//!
//! let config = LodJobConfig::default()
//!     .with_target_triangle_ratio(0.5)
//!     .with_atlas_resolution(256);
//! if let Some(output) = run(&mesh, config)?.into_output() {
//!     println!("{} triangles", output.mesh.triangle_count());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: simplification, unwrap, bake and pipeline
//! - `spatial`: BVH queries (pulled in by `bake`)
//! - `all`: every crate

// Re-export core functionality
pub use lodforge_core::*;

// Re-export sub-crates
#[cfg(feature = "spatial")]
pub use lodforge_spatial as spatial;

#[cfg(feature = "simplification")]
pub use lodforge_simplification as simplification;

#[cfg(feature = "unwrap")]
pub use lodforge_unwrap as unwrap;

#[cfg(feature = "bake")]
pub use lodforge_bake as bake;

#[cfg(feature = "pipeline")]
pub use lodforge_pipeline as pipeline;

/// Convenient imports for common use cases
pub mod prelude {
    pub use lodforge_core::*;

    #[cfg(feature = "spatial")]
    pub use lodforge_spatial::{RayHit, SurfaceSample, TriangleBvh};

    #[cfg(feature = "simplification")]
    pub use lodforge_simplification::{
        weld_vertices, EdgeCollapseSimplifier, MeshSimplifier, SimplifyOptions, SimplifyReport,
        SimplifyTarget,
    };

    #[cfg(feature = "unwrap")]
    pub use lodforge_unwrap::{build_atlas, AtlasLayout, AtlasOptions, AtlasResult};

    #[cfg(feature = "bake")]
    pub use lodforge_bake::{BakeChannel, BakeOptions, BakeResult, MaterialBaker};

    #[cfg(feature = "pipeline")]
    pub use lodforge_pipeline::{
        run, JobEvent, JobOutcome, JobOutput, JobStatus, LodJobConfig, LodPipeline, NoProgress,
        ProgressListener, ResultSink, Stage,
    };
}
