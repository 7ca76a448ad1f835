//! Configuration management for the street-view filtering pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

/// Filesystem locations for batch inference
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the street-view images to classify
    pub source_dir: String,
    /// Directory matched images are copied into
    pub dest_dir: String,
    /// JSON file mapping model names to weight files
    pub ensemble_config: String,
    /// Class index that marks an image as a match
    #[serde(default = "default_target_class")]
    pub target_class: i64,
}

/// Batch-inference pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Batch size for ensemble inference
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Worker threads for the final copy fan-out
    #[serde(default = "default_copy_workers")]
    pub copy_workers: usize,
    /// Square edge length images are resized to before inference
    #[serde(default = "default_image_size")]
    pub image_size: i64,
    /// Number of output classes of every sub-model
    #[serde(default = "default_num_classes")]
    pub num_classes: i64,
}

/// Defaults for the training binary
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Backbone architecture name (resnet18, resnet34, densenet121, vgg16)
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Dataset root with train/ and valid/ ImageFolder layouts
    pub data_dir: String,
    /// Directory epoch checkpoints are written into
    #[serde(default)]
    pub checkpoint_dir: Option<String>,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_train_batch_size")]
    pub batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

fn default_target_class() -> i64 {
    1
}

fn default_batch_size() -> usize {
    256
}

fn default_copy_workers() -> usize {
    4
}

fn default_image_size() -> i64 {
    224
}

fn default_num_classes() -> i64 {
    2
}

fn default_architecture() -> String {
    "resnet18".to_string()
}

fn default_lr() -> f64 {
    0.01
}

fn default_epochs() -> usize {
    30
}

fn default_train_batch_size() -> usize {
    32
}

impl AppConfig {
    /// Load configuration from the default file location
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
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
            paths: PathsConfig {
                source_dir: "data/streetviews".to_string(),
                dest_dir: "data/noise_barrier_predict".to_string(),
                ensemble_config: "config/ensemble.json".to_string(),
                target_class: default_target_class(),
            },
            pipeline: PipelineConfig {
                batch_size: default_batch_size(),
                copy_workers: default_copy_workers(),
                image_size: default_image_size(),
                num_classes: default_num_classes(),
            },
            training: TrainingConfig {
                architecture: default_architecture(),
                data_dir: "data/labeled".to_string(),
                checkpoint_dir: Some("checkpoints".to_string()),
                lr: default_lr(),
                epochs: default_epochs(),
                batch_size: default_train_batch_size(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.paths.target_class, 1);
        assert_eq!(config.pipeline.batch_size, 256);
        assert_eq!(config.pipeline.image_size, 224);
        assert_eq!(config.pipeline.num_classes, 2);
        assert_eq!(config.training.architecture, "resnet18");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[paths]
source_dir = "imgs"
dest_dir = "out"
ensemble_config = "ensemble.json"
target_class = 0

[pipeline]
batch_size = 8

[training]
data_dir = "data"

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.paths.source_dir, "imgs");
        assert_eq!(config.paths.target_class, 0);
        assert_eq!(config.pipeline.batch_size, 8);
        // Unset fields fall back to serde defaults
        assert_eq!(config.pipeline.copy_workers, 4);
        assert_eq!(config.training.epochs, 30);
    }
}
