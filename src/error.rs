//! Typed errors for the scoring pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::service::RunState;

/// Errors that abort a single pipeline run.
///
/// Artifact-write and explainability failures are deliberately absent: those
/// degrade inside their own stage and never fail a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read input file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("required column '{column}' is missing from the input")]
    MissingColumn { column: String },

    #[error("column '{column}' must be numeric")]
    NonNumericColumn { column: String },

    #[error("unparseable timestamp '{value}' at row {row}")]
    Timestamp { row: usize, value: String },

    #[error("model inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("model produced an unusable output: {0}")]
    Output(String),

    #[error("model state was poisoned by a panicked run")]
    Poisoned,
}

impl PipelineError {
    /// The last state the run reached before this error made it `Failed`.
    pub fn failed_state(&self) -> RunState {
        match self {
            PipelineError::Read { .. } => RunState::Received,
            PipelineError::MissingColumn { .. }
            | PipelineError::NonNumericColumn { .. }
            | PipelineError::Timestamp { .. } => RunState::Read,
            PipelineError::Inference(_)
            | PipelineError::Output(_)
            | PipelineError::Poisoned => RunState::Transformed,
        }
    }
}

/// Errors raised while writing a single output artifact. Each artifact has
/// its own failure boundary; these are logged, never propagated.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to render density plot: {0}")]
    Render(String),
}
