//! Host boundary: where job input comes from and where output goes

use crate::pipeline::JobOutput;
use lodforge_core::Result;

pub use lodforge_core::MeshSource;

/// Host capability that accepts a finished job's output
pub trait ResultSink {
    fn accept(&mut self, output: &JobOutput) -> Result<()>;
}

impl<F> ResultSink for F
where
    F: FnMut(&JobOutput) -> Result<()>,
{
    fn accept(&mut self, output: &JobOutput) -> Result<()> {
        self(output)
    }
}

/// Sink that keeps a copy of every output it receives
impl ResultSink for Vec<JobOutput> {
    fn accept(&mut self, output: &JobOutput) -> Result<()> {
        self.push(output.clone());
        Ok(())
    }
}
