//! Configuration management for the fraud scoring service.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;

use crate::models::classifier::{DEFAULT_THRESHOLD, DEFAULT_TOP_K};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Service directories and the model artifact location.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Directory watched for landed record files.
    pub input_dir: String,
    /// Directory run artifacts are written to (created if absent).
    pub output_dir: String,
    /// Path to the pretrained ONNX model artifact.
    pub model_path: String,
}

/// Detection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Decision threshold; a record is flagged only when its probability is
    /// strictly above this value.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// How many feature importances each run reports.
    #[serde(default = "default_top_k")]
    pub top_k_importances: usize,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of files processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of threads for ONNX inference (default: 1).
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
}

/// Metrics reporting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between periodic metrics summaries.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_workers() -> usize {
    4
}

fn default_onnx_threads() -> usize {
    1
}

fn default_report_interval() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from the default file.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                input_dir: "input".to_string(),
                output_dir: "output".to_string(),
                model_path: "models/fraud_model.onnx".to_string(),
            },
            detection: DetectionConfig {
                threshold: default_threshold(),
                top_k_importances: default_top_k(),
            },
            pipeline: PipelineConfig {
                workers: default_workers(),
                onnx_threads: default_onnx_threads(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig::default(),
        }
    }
}
