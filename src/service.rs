//! Pipeline orchestration: one isolated scoring run per landed file.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::artifacts::ArtifactWriter;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::metrics::PipelineMetrics;
use crate::models::classifier::{RiskScorer, DEFAULT_TOP_K};
use crate::preprocessing;

/// States a run moves through. `Failed` is terminal and reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Read,
    Transformed,
    Scored,
    Persisted,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Received => "received",
            RunState::Read => "read",
            RunState::Transformed => "transformed",
            RunState::Scored => "scored",
            RunState::Persisted => "persisted",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Run identifier derived from the input file's base name.
    pub run_id: String,
    /// Binary labels, index-aligned with the input rows.
    pub predictions: Vec<u8>,
}

/// Sequences the scoring stages for each landed file and isolates failures
/// so one bad file never stops the service.
pub struct FraudService<S> {
    scorer: S,
    artifacts: ArtifactWriter,
    metrics: Arc<PipelineMetrics>,
    top_k: usize,
}

impl<S: RiskScorer> FraudService<S> {
    pub fn new(scorer: S, artifacts: ArtifactWriter, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            scorer,
            artifacts,
            metrics,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override how many feature importances each run reports.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Process one landed file. Failures are logged with the file identity
    /// and fully contained: the return value is `None` and nothing
    /// propagates to the hosting process.
    pub fn process(&self, path: &Path) -> Option<RunOutcome> {
        let started = Instant::now();
        match self.run(path) {
            Ok(outcome) => {
                self.metrics
                    .record_run(started.elapsed(), outcome.predictions.len());
                Some(outcome)
            }
            Err(e) => {
                error!(
                    file = %path.display(),
                    state = %e.failed_state(),
                    error = %e,
                    "run failed; file isolated"
                );
                self.metrics.record_failure();
                None
            }
        }
    }

    fn run(&self, path: &Path) -> Result<RunOutcome, PipelineError> {
        let run_id = run_identifier(path);
        info!(file = %path.display(), run_id = %run_id, "processing landed file");

        let raw = Frame::from_csv_path(path)?;
        debug!(run_id = %run_id, rows = raw.nrows(), state = %RunState::Read, "file read");

        let features = preprocessing::preprocess(raw)?;
        debug!(run_id = %run_id, features = features.ncols(), state = %RunState::Transformed, "features engineered");

        let predictions = self.scorer.predict(&features)?;
        let scores = self.scorer.predict_scores(&features)?;
        let importances = self.scorer.top_feature_importances(Some(&features), self.top_k);
        debug!(run_id = %run_id, state = %RunState::Scored, "records scored");

        self.artifacts
            .persist(&run_id, &predictions, &scores, &importances);
        debug!(run_id = %run_id, state = %RunState::Persisted, "artifacts persisted");

        info!(
            run_id = %run_id,
            rows = predictions.len(),
            flagged = predictions.iter().filter(|&&label| label == 1).count(),
            state = %RunState::Completed,
            "run completed"
        );
        Ok(RunOutcome {
            run_id,
            predictions,
        })
    }
}

/// Run identifier: the input file's base name with the extension stripped.
pub fn run_identifier(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
