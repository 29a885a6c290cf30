//! ONNX model loading.

use std::path::Path;

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

/// Loaded ONNX model with the metadata the classifier needs per call.
pub struct LoadedModel {
    /// Model name, derived from the artifact file name.
    pub name: String,
    /// ONNX Runtime session.
    pub session: Session,
    /// Input name for the model.
    pub input_name: String,
    /// Output name for probabilities.
    pub output_name: String,
    /// Importances stored in the artifact's custom metadata, if any. Used
    /// when importance is requested without a feature table to condition on.
    pub stored_importances: Option<Vec<(String, f64)>>,
}

/// Loader for the pretrained model artifact.
pub struct ModelLoader {
    /// Number of threads for ONNX inference.
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread).
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    /// Create a new model loader with the given intra-op thread count.
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        debug!(onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load the model artifact from file.
    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModel> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        info!(model = %name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        let stored_importances = read_stored_importances(path);

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            has_stored_importances = stored_importances.is_some(),
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name,
            session,
            input_name,
            output_name,
            stored_importances,
        })
    }
}

/// Training pipelines export the model's global importances alongside the
/// artifact as `<model>.importances.json` (the ONNX export itself does not
/// keep them). Absent or unreadable sidecars just disable the fallback.
fn read_stored_importances(model_path: &Path) -> Option<Vec<(String, f64)>> {
    let sidecar = model_path.with_extension("importances.json");
    let raw = std::fs::read_to_string(&sidecar).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let object = parsed.as_object()?;
    let importances: Vec<(String, f64)> = object
        .iter()
        .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
        .collect();
    if importances.is_empty() {
        None
    } else {
        debug!(path = %sidecar.display(), entries = importances.len(), "loaded stored feature importances");
        Some(importances)
    }
}
