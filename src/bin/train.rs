//! Trains one transfer-learning classifier from the `[training]` config
//! section over a `train/` + `valid/` ImageFolder layout.

use anyhow::Result;
use std::path::{Path, PathBuf};
use streetview_filter::config::AppConfig;
use streetview_filter::data::ImageFolderDataset;
use streetview_filter::models::classifier::FitOptions;
use streetview_filter::models::loader::ModelLoader;
use tch::Device;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let training = &config.training;
    let device = Device::cuda_if_available();
    info!(
        architecture = %training.architecture,
        data_dir = %training.data_dir,
        epochs = training.epochs,
        lr = training.lr,
        device = ?device,
        "Starting training"
    );

    let loader = ModelLoader::new(config.pipeline.num_classes, device);
    let mut classifier = loader.build_model(&training.architecture)?;

    let data_root = Path::new(&training.data_dir);
    let mut train = ImageFolderDataset::new(
        data_root.join("train"),
        config.pipeline.image_size,
        training.batch_size,
    )?;
    let mut valid = ImageFolderDataset::new(
        data_root.join("valid"),
        config.pipeline.image_size,
        training.batch_size,
    )?;
    info!(
        train_samples = train.len(),
        valid_samples = valid.len(),
        classes = ?train.classes(),
        "Datasets loaded"
    );

    let opts = FitOptions {
        lr: training.lr,
        epochs: training.epochs,
        checkpoint_dir: training.checkpoint_dir.clone().map(PathBuf::from),
        ..Default::default()
    };
    let report = classifier.fit(Some(&mut train), Some(&mut valid), &opts)?;

    info!(
        final_train_acc = report.train_accuracy.last().copied().unwrap_or(0.0),
        final_valid_acc = report.valid_accuracy.last().copied().unwrap_or(0.0),
        "Training complete"
    );
    Ok(())
}
