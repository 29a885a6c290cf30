//! End-to-end pipeline scenarios driven through `FraudService`.
//!
//! A deterministic stub stands in for the ONNX classifier so the full
//! read → transform → score → persist path runs without a model artifact.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fraud_scoring_service::artifacts::ArtifactWriter;
use fraud_scoring_service::error::PipelineError;
use fraud_scoring_service::frame::Frame;
use fraud_scoring_service::metrics::PipelineMetrics;
use fraud_scoring_service::models::classifier::{apply_threshold, ImportanceSummary, RiskScorer};
use fraud_scoring_service::service::FraudService;
use tempfile::TempDir;

/// Scores each row by its position, so labels and artifacts are exactly
/// reproducible across runs.
struct StubScorer {
    threshold: f64,
}

impl RiskScorer for StubScorer {
    fn predict(&self, features: &Frame) -> Result<Vec<u8>, PipelineError> {
        Ok(apply_threshold(&self.predict_scores(features)?, self.threshold))
    }

    fn predict_scores(&self, features: &Frame) -> Result<Vec<f64>, PipelineError> {
        let nrows = features.nrows();
        Ok((0..nrows)
            .map(|row| row as f64 / nrows.max(1) as f64)
            .collect())
    }

    fn top_feature_importances(
        &self,
        features: Option<&Frame>,
        top_k: usize,
    ) -> ImportanceSummary {
        let mut pairs: ImportanceSummary = features
            .map(|frame| {
                frame
                    .names()
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), (frame.ncols() - i) as f64))
                    .collect()
            })
            .unwrap_or_default();
        pairs.truncate(top_k);
        pairs
    }
}

const SAMPLE_CSV: &str = "\
transaction_time,lat,lon,merchant_lat,merchant_lon,amount,merchant_type
2024-03-15 10:30:00,55.75,37.61,55.76,37.64,120.50,grocery
2024-03-16 22:05:10,59.93,30.33,59.93,30.33,,online
2024-03-17 08:15:45,40.71,-74.00,40.73,-73.99,310.00,travel
";

fn service_in(output_dir: &Path) -> FraudService<StubScorer> {
    FraudService::new(
        StubScorer { threshold: 0.5 },
        ArtifactWriter::new(output_dir).unwrap(),
        Arc::new(PipelineMetrics::new()),
    )
}

#[test]
fn scores_a_landed_file_and_writes_all_artifacts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tx_001.csv");
    fs::write(&input, SAMPLE_CSV).unwrap();
    let output = dir.path().join("out");
    let service = service_in(&output);

    let outcome = service.process(&input).expect("run should succeed");
    assert_eq!(outcome.run_id, "tx_001");
    assert_eq!(outcome.predictions.len(), 3);

    // predictions: one row per record, indexed by original position
    let predictions = fs::read_to_string(output.join("predictions_tx_001.csv")).unwrap();
    let lines: Vec<&str> = predictions.lines().collect();
    assert_eq!(lines[0], "index,prediction");
    assert_eq!(lines.len(), 4);
    for (row, line) in lines[1..].iter().enumerate() {
        assert!(line.starts_with(&format!("{row},")), "bad line: {line}");
    }

    // importances: at most five entries, descending by value
    let importances = fs::read_to_string(output.join("importances_tx_001.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&importances).unwrap();
    let entries = parsed.as_object().unwrap();
    assert!(!entries.is_empty() && entries.len() <= 5);
    let values: Vec<f64> = entries.values().map(|v| v.as_f64().unwrap()).collect();
    assert!(values.windows(2).all(|pair| pair[0] >= pair[1]));

    // density diagnostic is a PNG
    let png = fs::read(output.join("scores_density_tx_001.png")).unwrap();
    assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
}

#[test]
fn zero_row_file_completes_with_header_only_predictions() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("empty.csv");
    fs::write(
        &input,
        "transaction_time,lat,lon,merchant_lat,merchant_lon,amount\n",
    )
    .unwrap();
    let output = dir.path().join("out");
    let service = service_in(&output);

    let outcome = service.process(&input).expect("empty file is not an error");
    assert!(outcome.predictions.is_empty());

    let predictions = fs::read_to_string(output.join("predictions_empty.csv")).unwrap();
    assert_eq!(predictions, "index,prediction\n");

    // no finite scores, so the density diagnostic is skipped
    assert!(!output.join("scores_density_empty.png").exists());
}

#[test]
fn reprocessing_the_same_file_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tx_rerun.csv");
    fs::write(&input, SAMPLE_CSV).unwrap();
    let output = dir.path().join("out");
    let service = service_in(&output);

    service.process(&input).unwrap();
    let first = fs::read(output.join("predictions_tx_rerun.csv")).unwrap();

    service.process(&input).unwrap();
    let second = fs::read(output.join("predictions_tx_rerun.csv")).unwrap();

    assert_eq!(first, second);
}

#[test]
fn same_base_name_fully_overwrites_previous_artifacts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tx_dup.csv");
    let output = dir.path().join("out");
    let service = service_in(&output);

    fs::write(&input, SAMPLE_CSV).unwrap();
    service.process(&input).unwrap();

    let single_row = "\
transaction_time,lat,lon,merchant_lat,merchant_lon,amount,merchant_type
2024-03-18 09:00:00,48.85,2.35,48.86,2.35,42.0,grocery
";
    fs::write(&input, single_row).unwrap();
    service.process(&input).unwrap();

    let predictions = fs::read_to_string(output.join("predictions_tx_dup.csv")).unwrap();
    assert_eq!(predictions, "index,prediction\n0,0\n");
}

#[test]
fn malformed_timestamp_fails_the_run_without_artifacts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("bad_time.csv");
    fs::write(
        &input,
        "transaction_time,lat,lon,merchant_lat,merchant_lon\n\
         not-a-time,55.75,37.61,55.75,37.61\n",
    )
    .unwrap();
    let output = dir.path().join("out");
    let service = service_in(&output);

    assert!(service.process(&input).is_none());
    assert!(!output.join("predictions_bad_time.csv").exists());
    assert!(!output.join("importances_bad_time.json").exists());
    assert!(!output.join("scores_density_bad_time.png").exists());
}

#[test]
fn missing_required_column_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("no_geo.csv");
    fs::write(&input, "transaction_time,amount\n2024-03-15 10:30:00,5.0\n").unwrap();
    let service = service_in(&dir.path().join("out"));

    assert!(service.process(&input).is_none());
}

#[test]
fn a_failed_file_does_not_affect_the_next_run() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let metrics = Arc::new(PipelineMetrics::new());
    let service = FraudService::new(
        StubScorer { threshold: 0.5 },
        ArtifactWriter::new(&output).unwrap(),
        metrics.clone(),
    );

    let bad = dir.path().join("bad.csv");
    fs::write(&bad, "transaction_time,lat\ngarbage,1.0\n").unwrap();
    assert!(service.process(&bad).is_none());

    let good = dir.path().join("good.csv");
    fs::write(&good, SAMPLE_CSV).unwrap();
    let outcome = service.process(&good).expect("later file still processes");
    assert_eq!(outcome.predictions.len(), 3);

    assert_eq!(metrics.files_processed(), 1);
    assert_eq!(metrics.files_failed(), 1);
    assert_eq!(metrics.rows_scored(), 3);
}

#[test]
fn unreadable_file_is_isolated() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir.path().join("out"));
    assert!(service.process(&dir.path().join("does_not_exist.csv")).is_none());
}
