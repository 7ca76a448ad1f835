//! Street-View Filter - Main Entry Point
//!
//! Loads the model ensemble, classifies every image under the configured
//! source directory, and copies the matches to the destination directory.

use anyhow::Result;
use streetview_filter::{config::AppConfig, pipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);

    info!("Starting street-view filtering pipeline");
    info!(
        source = %config.paths.source_dir,
        dest = %config.paths.dest_dir,
        ensemble = %config.paths.ensemble_config,
        target_class = config.paths.target_class,
        batch_size = config.pipeline.batch_size,
        copy_workers = config.pipeline.copy_workers,
        "Configuration loaded"
    );

    let summary = pipeline::run(&config)?;
    info!(
        images = summary.images,
        matched = summary.matched,
        copied = summary.copied,
        copy_failures = summary.copy_failures,
        "Pipeline finished"
    );

    Ok(())
}
