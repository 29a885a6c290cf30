//! Fraud Scoring Service Library
//!
//! An event-triggered fraud scoring pipeline: landed CSV record batches are
//! transformed into model-ready features, scored by a pretrained ONNX
//! classifier behind a fixed decision threshold, and persisted as
//! per-file artifacts (predictions, feature importances, score density
//! diagnostic), with every failure isolated to its own run.

pub mod artifacts;
pub mod config;
pub mod density;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod models;
pub mod preprocessing;
pub mod service;
pub mod watcher;

pub use artifacts::ArtifactWriter;
pub use config::AppConfig;
pub use error::{ArtifactError, PipelineError};
pub use frame::{Column, Frame};
pub use models::classifier::{ClassifierModel, ImportanceSummary, RiskScorer};
pub use service::{FraudService, RunOutcome, RunState};
