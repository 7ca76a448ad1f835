//! Street-View Filtering Library
//!
//! Trains and evaluates torch image classifiers (with optional test-time
//! augmentation) and filters street-view image folders through a
//! majority-vote ensemble of transfer-learning models.

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod transforms;

pub use config::AppConfig;
pub use data::{Batch, BatchStream};
pub use error::PipelineError;
pub use models::classifier::Classifier;
pub use models::ensemble::EnsembleClassifier;
pub use models::loader::ModelLoader;
pub use pipeline::PipelineSummary;
pub use transforms::TtaPipeline;
