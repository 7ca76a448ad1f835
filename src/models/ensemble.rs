//! Majority-vote ensemble over independently trained classifiers

use crate::models::classifier::Classifier;
use anyhow::{Context, Result};
use std::time::Instant;
use tch::Tensor;
use tracing::{debug, info};

/// Most frequent label in `votes`; ties break to the label encountered
/// first. `None` only for an empty slice.
pub fn majority_vote(votes: &[i64]) -> Option<i64> {
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for &vote in votes {
        match counts.iter_mut().find(|(label, _)| *label == vote) {
            Some((_, count)) => *count += 1,
            None => counts.push((vote, 1)),
        }
    }

    let mut best: Option<(i64, usize)> = None;
    for (label, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Runs every sub-model over the same batch and reduces the per-model
/// label sequences to one label per sample by majority vote.
///
/// Sub-models keep their insertion order; vote ties break to the label of
/// the earliest sub-model, so the order is part of the ensemble's
/// observable behavior.
pub struct EnsembleClassifier {
    models: Vec<(String, Classifier)>,
}

impl EnsembleClassifier {
    pub fn new(models: Vec<(String, Classifier)>) -> Result<Self> {
        anyhow::ensure!(!models.is_empty(), "Ensemble requires at least one model");
        info!(
            count = models.len(),
            names = ?models.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            "Ensemble classifier initialized"
        );
        Ok(Self { models })
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// One label per sample in `images`, majority-voted across sub-models.
    pub fn predict(&self, images: &Tensor) -> Result<Vec<i64>> {
        let mut per_model: Vec<Vec<i64>> = Vec::with_capacity(self.models.len());
        for (name, model) in &self.models {
            let start = Instant::now();
            let preds = model
                .predict(images)
                .with_context(|| format!("Sub-model {name} failed to predict"))?;
            debug!(
                model = %name,
                elapsed_us = start.elapsed().as_micros() as u64,
                "sub-model prediction complete"
            );
            per_model.push(preds);
        }

        let samples = per_model[0].len();
        anyhow::ensure!(
            per_model.iter().all(|preds| preds.len() == samples),
            "Sub-models disagree on batch size"
        );

        (0..samples)
            .map(|i| {
                let votes: Vec<i64> = per_model.iter().map(|preds| preds[i]).collect();
                majority_vote(&votes).context("No sub-model votes to reduce")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::constant_classifier;
    use tch::{Device, Kind};

    fn batch(samples: i64) -> Tensor {
        Tensor::zeros([samples, 3, 8, 8], (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_majority_vote_mode() {
        assert_eq!(majority_vote(&[1, 0, 1]), Some(1));
        assert_eq!(majority_vote(&[2, 2, 0, 2, 0]), Some(2));
        assert_eq!(majority_vote(&[]), None);
    }

    #[test]
    fn test_majority_vote_tie_breaks_first_seen() {
        assert_eq!(majority_vote(&[1, 2]), Some(1));
        assert_eq!(majority_vote(&[2, 1, 1, 2]), Some(2));
    }

    #[test]
    fn test_unanimous_models_return_agreed_label() {
        let ensemble = EnsembleClassifier::new(vec![
            ("a".to_string(), constant_classifier(1, 2)),
            ("b".to_string(), constant_classifier(1, 2)),
            ("c".to_string(), constant_classifier(1, 2)),
        ])
        .unwrap();
        assert_eq!(ensemble.predict(&batch(4)).unwrap(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_two_vs_one_returns_majority() {
        let ensemble = EnsembleClassifier::new(vec![
            ("a".to_string(), constant_classifier(0, 2)),
            ("b".to_string(), constant_classifier(1, 2)),
            ("c".to_string(), constant_classifier(0, 2)),
        ])
        .unwrap();
        assert_eq!(ensemble.predict(&batch(2)).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        assert!(EnsembleClassifier::new(Vec::new()).is_err());
    }
}
