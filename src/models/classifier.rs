//! Thresholded classification and explainability over a pretrained model.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::Result;
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::frame::{Column, Frame};
use crate::models::loader::{LoadedModel, ModelLoader};

/// Default decision threshold: flag only when the model is very confident.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Default number of feature importances reported per run.
pub const DEFAULT_TOP_K: usize = 5;

/// Ranked feature attributions, descending by importance.
pub type ImportanceSummary = Vec<(String, f64)>;

/// Scoring operations the pipeline needs from a model.
pub trait RiskScorer: Send + Sync {
    /// Binary fraud labels, one per row, index-aligned with the input.
    fn predict(&self, features: &Frame) -> Result<Vec<u8>, PipelineError>;

    /// Raw positive-class probabilities, one per row.
    fn predict_scores(&self, features: &Frame) -> Result<Vec<f64>, PipelineError>;

    /// Top-k feature attributions, conditioned on `features` when given.
    /// Degrades to an empty summary on any failure; never aborts scoring.
    fn top_feature_importances(&self, features: Option<&Frame>, top_k: usize)
        -> ImportanceSummary;
}

/// Binary labels from scores: 1 iff the score is strictly above the
/// threshold, so a boundary-equal probability stays non-fraud.
pub fn apply_threshold(scores: &[f64], threshold: f64) -> Vec<u8> {
    scores.iter().map(|&score| u8::from(score > threshold)).collect()
}

/// Sort attributions descending by value and keep the top `top_k`.
pub fn rank_importances(mut pairs: ImportanceSummary, top_k: usize) -> ImportanceSummary {
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    pairs.truncate(top_k);
    pairs
}

/// Pretrained classifier with a fixed decision threshold.
///
/// Immutable after load and shareable across concurrent runs; the lock is
/// an interior-mutability detail of the ONNX session, not visible state.
pub struct ClassifierModel {
    model: RwLock<LoadedModel>,
    threshold: f64,
}

impl ClassifierModel {
    /// Load the model artifact with the default single inference thread.
    pub fn load<P: AsRef<Path>>(model_path: P, threshold: f64) -> Result<Self> {
        Self::with_threads(model_path, threshold, 1)
    }

    /// Load the model artifact with the given intra-op thread count.
    pub fn with_threads<P: AsRef<Path>>(
        model_path: P,
        threshold: f64,
        onnx_threads: usize,
    ) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!("decision threshold must be in (0, 1], got {threshold}");
        }
        let model = ModelLoader::with_threads(onnx_threads)?.load_model(model_path)?;
        Ok(Self {
            model: RwLock::new(model),
            threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn scores(&self, features: &Frame) -> Result<Vec<f64>, PipelineError> {
        if features.nrows() == 0 {
            return Ok(Vec::new());
        }
        let batch = EncodedBatch::from_frame(features);
        self.run_scores(batch.data, batch.nrows, batch.ncols)
    }

    /// One batched session run over a row-major `[nrows, ncols]` tensor.
    fn run_scores(
        &self,
        data: Vec<f32>,
        nrows: usize,
        ncols: usize,
    ) -> Result<Vec<f64>, PipelineError> {
        let mut model = self.model.write().map_err(|_| PipelineError::Poisoned)?;
        let input_name = model.input_name.clone();
        let output_name = model.output_name.clone();

        let shape = vec![nrows as i64, ncols as i64];
        let input_tensor = Tensor::from_array((shape, data))?;

        let outputs = model.session.run(ort::inputs![input_name.as_str() => input_tensor])?;
        extract_scores(&outputs, &output_name, nrows)
    }

    fn compute_importances(
        &self,
        features: Option<&Frame>,
        top_k: usize,
    ) -> Result<ImportanceSummary, PipelineError> {
        match features {
            Some(frame) if frame.nrows() > 0 => self.ablation_importances(frame, top_k),
            _ => self.stored_importances(top_k),
        }
    }

    /// Importance conditioned on the batch: the mean signed change in
    /// predicted probability when one feature is replaced by its neutral
    /// value (batch mean; modal category for auto-detected categoricals).
    fn ablation_importances(
        &self,
        frame: &Frame,
        top_k: usize,
    ) -> Result<ImportanceSummary, PipelineError> {
        let batch = EncodedBatch::from_frame(frame);
        let baseline = self.run_scores(batch.data.clone(), batch.nrows, batch.ncols)?;

        let mut pairs = ImportanceSummary::with_capacity(batch.ncols);
        for feature in 0..batch.ncols {
            let neutral = batch.neutral_value(feature);
            let mut ablated = batch.data.clone();
            for row in 0..batch.nrows {
                ablated[row * batch.ncols + feature] = neutral;
            }
            let scores = self.run_scores(ablated, batch.nrows, batch.ncols)?;
            let shift = baseline
                .iter()
                .zip(&scores)
                .map(|(base, ablated)| base - ablated)
                .sum::<f64>()
                / batch.nrows as f64;
            pairs.push((batch.names[feature].clone(), shift));
        }
        Ok(rank_importances(pairs, top_k))
    }

    fn stored_importances(&self, top_k: usize) -> Result<ImportanceSummary, PipelineError> {
        let model = self.model.read().map_err(|_| PipelineError::Poisoned)?;
        match &model.stored_importances {
            Some(pairs) => Ok(rank_importances(pairs.clone(), top_k)),
            None => Err(PipelineError::Output(
                "model artifact carries no stored feature importances".to_string(),
            )),
        }
    }
}

impl RiskScorer for ClassifierModel {
    fn predict(&self, features: &Frame) -> Result<Vec<u8>, PipelineError> {
        let scores = self.scores(features)?;
        Ok(apply_threshold(&scores, self.threshold))
    }

    fn predict_scores(&self, features: &Frame) -> Result<Vec<f64>, PipelineError> {
        self.scores(features)
    }

    fn top_feature_importances(
        &self,
        features: Option<&Frame>,
        top_k: usize,
    ) -> ImportanceSummary {
        match self.compute_importances(features, top_k) {
            Ok(ranked) => ranked,
            Err(error) => {
                warn!(
                    error = %error,
                    "failed to compute feature importances; continuing without explanations"
                );
                ImportanceSummary::new()
            }
        }
    }
}

/// Row-major f32 encoding of a feature frame. Text columns are ordinal
/// codes over the column's sorted distinct values, deterministic per batch,
/// and flagged as categorical for the ablation step.
struct EncodedBatch {
    names: Vec<String>,
    categorical: Vec<bool>,
    data: Vec<f32>,
    nrows: usize,
    ncols: usize,
}

impl EncodedBatch {
    fn from_frame(frame: &Frame) -> Self {
        let nrows = frame.nrows();
        let mut names = Vec::with_capacity(frame.ncols());
        let mut categorical = Vec::with_capacity(frame.ncols());
        let mut encoded: Vec<Vec<f32>> = Vec::with_capacity(frame.ncols());

        for (name, column) in frame.columns() {
            names.push(name.to_string());
            match column {
                Column::Float(values) => {
                    categorical.push(false);
                    encoded.push(values.iter().map(|&v| v as f32).collect());
                }
                Column::Text(values) => {
                    categorical.push(true);
                    let mut distinct: Vec<&str> =
                        values.iter().flatten().map(String::as_str).collect();
                    distinct.sort_unstable();
                    distinct.dedup();
                    encoded.push(
                        values
                            .iter()
                            .map(|value| {
                                value
                                    .as_deref()
                                    .and_then(|v| distinct.binary_search(&v).ok())
                                    .map_or(-1.0, |code| code as f32)
                            })
                            .collect(),
                    );
                }
            }
        }

        let ncols = encoded.len();
        let mut data = vec![0.0f32; nrows * ncols];
        for (feature, column) in encoded.iter().enumerate() {
            for (row, &value) in column.iter().enumerate() {
                data[row * ncols + feature] = value;
            }
        }

        Self {
            names,
            categorical,
            data,
            nrows,
            ncols,
        }
    }

    /// The value a feature is ablated to: the batch mean for numeric
    /// features, the most frequent code (ties to the smallest) for
    /// categorical ones.
    fn neutral_value(&self, feature: usize) -> f32 {
        let values = (0..self.nrows).map(|row| self.data[row * self.ncols + feature]);
        if self.categorical[feature] {
            let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
            for value in values {
                *counts.entry(value as i64).or_insert(0) += 1;
            }
            counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map_or(-1.0, |(code, _)| code as f32)
        } else {
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for value in values {
                if value.is_finite() {
                    sum += f64::from(value);
                    count += 1;
                }
            }
            if count == 0 {
                0.0
            } else {
                (sum / count as f64) as f32
            }
        }
    }
}

/// Pull per-row positive-class probabilities out of the session outputs.
/// Handles both tensor outputs (XGBoost, RandomForest) and seq(map) outputs
/// (CatBoost, LightGBM).
fn extract_scores(
    outputs: &ort::session::SessionOutputs,
    output_name: &str,
    nrows: usize,
) -> Result<Vec<f64>, PipelineError> {
    if let Some(output) = outputs.get(output_name) {
        if let Ok(tensor) = output.try_extract_tensor::<f32>() {
            let (shape, data) = tensor;
            if let Some(scores) = scores_from_tensor(&shape, data, nrows) {
                return Ok(scores);
            }
        }
        if DynSequenceValueType::can_downcast(&output.dtype()) {
            if let Ok(scores) = scores_from_sequence(output, nrows) {
                return Ok(scores);
            }
        }
    }

    // Fallback: scan all outputs, skipping the label tensor.
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok(tensor) = output.try_extract_tensor::<f32>() {
            let (shape, data) = tensor;
            if let Some(scores) = scores_from_tensor(&shape, data, nrows) {
                debug!(output = %name, "extracted probabilities from fallback output");
                return Ok(scores);
            }
        }
        if DynSequenceValueType::can_downcast(&output.dtype()) {
            if let Ok(scores) = scores_from_sequence(&output, nrows) {
                debug!(output = %name, "extracted probabilities from fallback sequence");
                return Ok(scores);
            }
        }
    }

    Err(PipelineError::Output(format!(
        "no usable probability output for {nrows} rows"
    )))
}

fn scores_from_tensor(
    shape: &ort::tensor::Shape,
    data: &[f32],
    nrows: usize,
) -> Option<Vec<f64>> {
    let dims: Vec<i64> = shape.iter().copied().collect();
    match dims.as_slice() {
        // [batch, num_classes]: positive class is index 1
        [rows, classes] if *rows as usize == nrows && *classes >= 2 => {
            let classes = *classes as usize;
            Some((0..nrows).map(|row| f64::from(data[row * classes + 1])).collect())
        }
        // [batch, 1] or [batch]: a single probability per row
        [rows, 1] if *rows as usize == nrows => {
            Some(data.iter().map(|&v| f64::from(v)).collect())
        }
        [rows] if *rows as usize == nrows => {
            Some(data.iter().map(|&v| f64::from(v)).collect())
        }
        _ => None,
    }
}

/// seq(map(int64, float)) is the export shape CatBoost and LightGBM use:
/// one class-to-probability map per row.
fn scores_from_sequence(
    output: &ort::value::DynValue,
    nrows: usize,
) -> Result<Vec<f64>, PipelineError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| PipelineError::Output(format!("not a sequence output: {e}")))?;

    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| PipelineError::Output(format!("failed to extract sequence: {e}")))?;

    if maps.len() != nrows {
        return Err(PipelineError::Output(format!(
            "sequence length {} does not match row count {nrows}",
            maps.len()
        )));
    }

    let mut scores = Vec::with_capacity(nrows);
    for map_value in &maps {
        let kv_pairs = map_value
            .try_extract_key_values::<i64, f32>()
            .map_err(|e| PipelineError::Output(format!("failed to extract class map: {e}")))?;

        let positive = kv_pairs
            .iter()
            .find(|(class, _)| *class == 1)
            .map(|(_, prob)| f64::from(*prob));
        let score = match positive {
            Some(prob) => prob,
            None => kv_pairs
                .iter()
                .find(|(class, _)| *class == 0)
                .map(|(_, prob)| 1.0 - f64::from(*prob))
                .ok_or_else(|| {
                    PipelineError::Output("no class probability in output map".to_string())
                })?,
        };
        scores.push(score);
    }
    Ok(scores)
}
