//! Job progress events
//!
//! The orchestrator reports discrete events to a [`ProgressListener`].
//! Closures and `crossbeam_channel::Sender<JobEvent>` both implement it, so a
//! host can either subscribe with a callback or poll a receiver.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Weld,
    Simplify,
    Attributes,
    Unwrap,
    Bake,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Weld => "weld",
            Stage::Simplify => "simplify",
            Stage::Attributes => "attributes",
            Stage::Unwrap => "unwrap",
            Stage::Bake => "bake",
        };
        f.write_str(name)
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Cancelled { stage: Stage },
    Failed { stage: Stage, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage, elapsed: Duration },
    JobFinished { outcome: JobOutcome },
}

/// Receiver of job events; called on the thread that runs the job
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&JobEvent) + Send + Sync,
{
    fn on_event(&self, event: &JobEvent) {
        self(event)
    }
}

impl ProgressListener for Sender<JobEvent> {
    fn on_event(&self, event: &JobEvent) {
        // a host that dropped its receiver is no longer interested
        let _ = self.send(event.clone());
    }
}

/// Listener that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_event(&self, _event: &JobEvent) {}
}
