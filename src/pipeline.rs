//! Batch inference over an image directory with a copy fan-out
//!
//! Flow: source directory → ordered dataset → ensemble prediction per
//! batch → predictions concatenated in file order → files matching the
//! target class copied to the destination by a worker pool.

use crate::config::AppConfig;
use crate::data::PredictDataset;
use crate::metrics::PipelineMetrics;
use crate::models::loader::ModelLoader;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::Device;
use tracing::{error, info, warn};

/// Outcome counts for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub images: usize,
    pub matched: usize,
    pub copied: usize,
    pub copy_failures: usize,
}

/// Run the full batch-inference pipeline described by `config`.
pub fn run(config: &AppConfig) -> Result<PipelineSummary> {
    let device = Device::cuda_if_available();
    let loader = ModelLoader::new(config.pipeline.num_classes, device);
    let ensemble = loader.load_ensemble(Path::new(&config.paths.ensemble_config))?;

    let mut dataset = PredictDataset::from_dir(
        &config.paths.source_dir,
        config.pipeline.image_size,
        config.pipeline.batch_size,
    )?;
    info!(
        files = dataset.len(),
        models = ensemble.model_count(),
        device = ?device,
        "starting batch inference"
    );

    let metrics = PipelineMetrics::new();
    let mut predictions: Vec<i64> = Vec::with_capacity(dataset.len());
    while let Some(images) = dataset.next_images()? {
        let start = Instant::now();
        let labels = ensemble.predict(&images)?;
        metrics.record_batch(start.elapsed(), &labels);
        predictions.extend(labels);
    }

    let matched = matched_files(dataset.files(), &predictions, config.paths.target_class);
    metrics.record_matched(matched.len() as u64);
    info!(
        matched = matched.len(),
        target_class = config.paths.target_class,
        "inference complete"
    );

    let dest = Path::new(&config.paths.dest_dir);
    let copied = copy_files(
        &matched,
        dest,
        config.pipeline.copy_workers,
        Some(&metrics),
    )?;
    metrics.print_summary();

    Ok(PipelineSummary {
        images: predictions.len(),
        matched: matched.len(),
        copied: copied.0,
        copy_failures: copied.1,
    })
}

/// Files whose aligned prediction equals the target class, in input order.
fn matched_files(files: &[PathBuf], predictions: &[i64], target_class: i64) -> Vec<PathBuf> {
    files
        .iter()
        .zip(predictions.iter())
        .filter(|(_, &label)| label == target_class)
        .map(|(file, _)| file.clone())
        .collect()
}

/// Copy `files` into `dest` with a dedicated worker pool, filenames
/// unchanged. Copies are independent; a failure is logged and counted
/// without stopping the rest. Returns (copied, failed).
fn copy_files(
    files: &[PathBuf],
    dest: &Path,
    workers: usize,
    metrics: Option<&PipelineMetrics>,
) -> Result<(usize, usize)> {
    if files.is_empty() {
        return Ok((0, 0));
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create destination directory {:?}", dest))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("Failed to build copy worker pool")?;

    let outcomes: Vec<bool> = pool.install(|| {
        files
            .par_iter()
            .map(|src| {
                let name = match src.file_name() {
                    Some(name) => name,
                    None => {
                        warn!(file = %src.display(), "source path has no file name");
                        return false;
                    }
                };
                match fs::copy(src, dest.join(name)) {
                    Ok(_) => true,
                    Err(e) => {
                        error!(file = %src.display(), error = %e, "copy failed");
                        false
                    }
                }
            })
            .collect()
    });

    let copied = outcomes.iter().filter(|ok| **ok).count();
    let failed = outcomes.len() - copied;
    if let Some(metrics) = metrics {
        for ok in &outcomes {
            metrics.record_copy(*ok);
        }
    }
    Ok((copied, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_files_keeps_alignment() {
        let files = vec![
            PathBuf::from("a.png"),
            PathBuf::from("b.png"),
            PathBuf::from("c.png"),
        ];
        let matched = matched_files(&files, &[1, 0, 1], 1);
        assert_eq!(matched, [PathBuf::from("a.png"), PathBuf::from("c.png")]);
    }

    #[test]
    fn test_copy_files_parallel() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for i in 0..5 {
            let path = src_dir.path().join(format!("img{i}.png"));
            fs::write(&path, b"fake image bytes").unwrap();
            files.push(path);
        }

        let (copied, failed) = copy_files(&files, dest_dir.path(), 3, None).unwrap();
        assert_eq!((copied, failed), (5, 0));
        for i in 0..5 {
            assert!(dest_dir.path().join(format!("img{i}.png")).exists());
        }
    }

    #[test]
    fn test_copy_failure_is_isolated() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let good = src_dir.path().join("good.png");
        fs::write(&good, b"ok").unwrap();
        let files = vec![good, src_dir.path().join("missing.png")];

        let (copied, failed) = copy_files(&files, dest_dir.path(), 2, None).unwrap();
        assert_eq!((copied, failed), (1, 1));
        assert!(dest_dir.path().join("good.png").exists());
    }
}
