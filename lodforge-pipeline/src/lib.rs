//! LOD job orchestration for lodforge
//!
//! This crate sequences the other lodforge crates into one job:
//! - Input validation and optional vertex welding
//! - Quadric edge collapse simplification
//! - Optional normal recalculation
//! - UV atlas construction
//! - Material baking from the input onto the simplified mesh
//!
//! Jobs are configured with [`LodJobConfig`], report progress through a
//! [`ProgressListener`] and can be stopped with a
//! [`CancelToken`](lodforge_core::CancelToken).

pub mod config;
pub mod host;
pub mod parallel;
pub mod pipeline;
pub mod progress;

pub use config::LodJobConfig;
pub use host::{MeshSource, ResultSink};
pub use parallel::ThreadPoolConfig;
pub use pipeline::{run, JobOutput, JobStatus, LodPipeline, StageTimings};
pub use progress::{JobEvent, JobOutcome, NoProgress, ProgressListener, Stage};
