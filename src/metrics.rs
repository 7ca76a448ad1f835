//! Throughput and outcome tracking for the batch-inference pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for one pipeline run
pub struct PipelineMetrics {
    /// Total images classified
    pub images_processed: AtomicU64,
    /// Images matching the target class
    pub matched: AtomicU64,
    /// Files copied to the destination
    pub copied: AtomicU64,
    /// Copy attempts that failed
    pub copy_failures: AtomicU64,
    /// Predicted label distribution
    label_counts: RwLock<HashMap<i64, u64>>,
    /// Per-batch inference times (in microseconds)
    batch_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            images_processed: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            copied: AtomicU64::new(0),
            copy_failures: AtomicU64::new(0),
            label_counts: RwLock::new(HashMap::new()),
            batch_times: RwLock::new(Vec::with_capacity(256)),
            start_time: Instant::now(),
        }
    }

    /// Record one classified batch
    pub fn record_batch(&self, elapsed: Duration, labels: &[i64]) {
        self.images_processed
            .fetch_add(labels.len() as u64, Ordering::Relaxed);

        if let Ok(mut counts) = self.label_counts.write() {
            for label in labels {
                *counts.entry(*label).or_insert(0) += 1;
            }
        }
        if let Ok(mut times) = self.batch_times.write() {
            times.push(elapsed.as_micros() as u64);
        }
    }

    pub fn record_matched(&self, count: u64) {
        self.matched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_copy(&self, ok: bool) {
        if ok {
            self.copied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.copy_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Images classified per second since the run started
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.images_processed.load(Ordering::Relaxed) as f64 / elapsed
    }

    /// Mean per-batch inference time in microseconds
    pub fn mean_batch_us(&self) -> u64 {
        let times = match self.batch_times.read() {
            Ok(times) => times,
            Err(_) => return 0,
        };
        if times.is_empty() {
            return 0;
        }
        times.iter().sum::<u64>() / times.len() as u64
    }

    /// Emit a summary of the run
    pub fn print_summary(&self) {
        let mut distribution: Vec<(i64, u64)> = self
            .label_counts
            .read()
            .map(|counts| counts.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        distribution.sort();

        info!(
            images = self.images_processed.load(Ordering::Relaxed),
            matched = self.matched.load(Ordering::Relaxed),
            copied = self.copied.load(Ordering::Relaxed),
            copy_failures = self.copy_failures.load(Ordering::Relaxed),
            throughput = format!("{:.1} img/s", self.throughput()),
            mean_batch_us = self.mean_batch_us(),
            label_distribution = ?distribution,
            "pipeline summary"
        );
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_batch_counts_labels() {
        let metrics = PipelineMetrics::new();
        metrics.record_batch(Duration::from_micros(120), &[0, 1, 1]);
        metrics.record_batch(Duration::from_micros(80), &[1]);

        assert_eq!(metrics.images_processed.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.mean_batch_us(), 100);

        let counts = metrics.label_counts.read().unwrap();
        assert_eq!(counts.get(&0), Some(&1));
        assert_eq!(counts.get(&1), Some(&3));
    }

    #[test]
    fn test_copy_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_matched(2);
        metrics.record_copy(true);
        metrics.record_copy(false);

        assert_eq!(metrics.matched.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.copied.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.copy_failures.load(Ordering::Relaxed), 1);
    }
}
