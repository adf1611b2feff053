use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for the batch pipelines. External-tool and HTTP errors
/// are handled per unit of work; these are the conditions that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no candidate clips found in {0}")]
    EmptyPool(PathBuf),

    #[error("clip pool exhausted at {accumulated:.2}s before reaching target {target:.2}s")]
    PoolExhausted { target: f64, accumulated: f64 },

    #[error("no candidate in {0} probed a usable duration")]
    NoUsableDurations(PathBuf),

    #[error("every clip in {0} has already been used this run")]
    PoolUsedUp(PathBuf),

    #[error("external tool exited with failure: {0}")]
    ToolFailed(String),
}
