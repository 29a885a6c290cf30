//! Isolated persistence of per-run output artifacts.
//!
//! Each run produces three artifacts keyed by its run identifier: a
//! predictions table, a feature-importance document, and a score density
//! image. Every artifact has its own failure boundary — a write error is
//! logged and the remaining artifacts are still attempted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::density;
use crate::error::ArtifactError;
use crate::models::classifier::ImportanceSummary;

/// Writes run artifacts into the output directory, serializing writes that
/// share a run identifier so concurrent same-name runs cannot interleave.
pub struct ArtifactWriter {
    output_dir: PathBuf,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactWriter {
    /// Create the writer, creating the output directory if absent.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> std::io::Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            run_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist all three artifacts for one run. Never fails the run: each
    /// artifact is attempted independently and errors are logged.
    pub fn persist(
        &self,
        run_id: &str,
        predictions: &[u8],
        scores: &[f64],
        importances: &ImportanceSummary,
    ) {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(e) = self.write_predictions(run_id, predictions) {
            error!(run_id, error = %e, "failed to save predictions");
        }
        if let Err(e) = self.write_importances(run_id, importances) {
            error!(run_id, error = %e, "failed to save feature importances");
        }
        if let Err(e) = self.write_score_density(run_id, scores) {
            error!(run_id, error = %e, "failed to save scores density plot");
        }
    }

    fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    /// Row-index-to-label table, one row per input record, overwritten in
    /// place so re-processing the same file is idempotent.
    pub fn write_predictions(
        &self,
        run_id: &str,
        predictions: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.output_dir.join(format!("predictions_{run_id}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["index", "prediction"])?;
        for (index, label) in predictions.iter().enumerate() {
            writer.write_record([index.to_string(), label.to_string()])?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = predictions.len(), "saved predictions");
        Ok(path)
    }

    /// Importance summary as a human-readable JSON object; key order is the
    /// descending-importance order.
    pub fn write_importances(
        &self,
        run_id: &str,
        importances: &ImportanceSummary,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.output_dir.join(format!("importances_{run_id}.json"));
        let mut document = serde_json::Map::new();
        for (name, value) in importances {
            document.insert(name.clone(), serde_json::json!(value));
        }
        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(document))?;
        fs::write(&path, rendered)?;
        info!(path = %path.display(), entries = importances.len(), "saved feature importances");
        Ok(path)
    }

    /// Score density image. `Ok(None)` when there was nothing to render
    /// (zero finite scores) — a degradation, not an error.
    pub fn write_score_density(
        &self,
        run_id: &str,
        scores: &[f64],
    ) -> Result<Option<PathBuf>, ArtifactError> {
        let path = self.output_dir.join(format!("scores_density_{run_id}.png"));
        let rendered = density::render_score_density(scores, &path)
            .map_err(|e| ArtifactError::Render(e.to_string()))?;
        if !rendered {
            return Ok(None);
        }
        info!(path = %path.display(), "saved scores density plot");
        Ok(Some(path))
    }
}
