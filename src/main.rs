//! Fraud Scoring Service - Main Entry Point
//!
//! Watches the input directory for landed CSV record batches, scores each
//! file with the pretrained model, and writes per-file artifacts.
//! Files are processed in parallel, each run isolated from the others.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use fraud_scoring_service::{
    artifacts::ArtifactWriter,
    config::AppConfig,
    metrics::{MetricsReporter, PipelineMetrics},
    models::classifier::ClassifierModel,
    service::FraudService,
    watcher::InputWatcher,
};
use tokio::sync::Semaphore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "fraud_scoring_service={}",
            config.logging.level
        ))
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting fraud scoring service");
    info!(
        "Decision threshold: {:.2}, top importances: {}",
        config.detection.threshold, config.detection.top_k_importances
    );

    // Initialize metrics
    let metrics = Arc::new(PipelineMetrics::new());

    // Load the pretrained model once; it is shared read-only by all runs
    let classifier = ClassifierModel::with_threads(
        &config.service.model_path,
        config.detection.threshold,
        config.pipeline.onnx_threads,
    )?;
    info!(model = %config.service.model_path, "Classifier initialized");

    let artifacts = ArtifactWriter::new(&config.service.output_dir)?;
    info!(output_dir = %config.service.output_dir, "Artifact writer initialized");

    let service = Arc::new(
        FraudService::new(classifier, artifacts, metrics.clone())
            .with_top_k(config.detection.top_k_importances),
    );

    std::fs::create_dir_all(&config.service.input_dir)?;
    let mut watcher = InputWatcher::start(Path::new(&config.service.input_dir))?;

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let report_interval = config.metrics.report_interval_secs;
    tokio::spawn(async move {
        MetricsReporter::new(metrics_clone, report_interval)
            .start()
            .await;
    });

    // Semaphore to limit concurrent runs
    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers));

    loop {
        tokio::select! {
            landed = watcher.next() => {
                let Some(path) = landed else { break };
                let permit = semaphore.clone().acquire_owned().await?;
                let service = service.clone();
                tokio::task::spawn_blocking(move || {
                    service.process(&path);
                    drop(permit);
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    info!("Service shutting down...");
    metrics.print_summary();
    Ok(())
}
