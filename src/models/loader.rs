//! Transfer-learning model construction and ensemble config loading

use crate::error::PipelineError;
use crate::models::classifier::Classifier;
use crate::models::ensemble::EnsembleClassifier;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn::ModuleT;
use tch::vision::{densenet, resnet, vgg};
use tch::{nn, Device};
use tracing::info;

/// Backbone architectures the loader can build. Parsed from the part of a
/// model name before the first underscore, so `resnet18_fold3` and
/// `resnet18_v2` share a backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Resnet18,
    Resnet34,
    Densenet121,
    Vgg16,
}

impl Architecture {
    pub fn from_model_name(name: &str) -> Result<Self> {
        let prefix = name.split('_').next().unwrap_or(name);
        match prefix {
            "resnet18" => Ok(Architecture::Resnet18),
            "resnet34" => Ok(Architecture::Resnet34),
            "densenet121" => Ok(Architecture::Densenet121),
            "vgg16" => Ok(Architecture::Vgg16),
            other => Err(PipelineError::UnknownArchitecture(other.to_string()).into()),
        }
    }

    fn build(&self, p: &nn::Path, num_classes: i64) -> Box<dyn ModuleT> {
        match self {
            Architecture::Resnet18 => Box::new(resnet::resnet18(p, num_classes)),
            Architecture::Resnet34 => Box::new(resnet::resnet34(p, num_classes)),
            Architecture::Densenet121 => Box::new(densenet::densenet121(p, num_classes)),
            Architecture::Vgg16 => Box::new(vgg::vgg16(p, num_classes)),
        }
    }
}

/// Builds classifiers from architecture names and checkpoint files.
pub struct ModelLoader {
    num_classes: i64,
    device: Device,
}

impl ModelLoader {
    pub fn new(num_classes: i64, device: Device) -> Self {
        Self {
            num_classes,
            device,
        }
    }

    /// Build a freshly initialized model for training.
    pub fn build_model(&self, name: &str) -> Result<Classifier> {
        let arch = Architecture::from_model_name(name)?;
        let vs = nn::VarStore::new(self.device);
        let net = arch.build(&vs.root(), self.num_classes);
        Ok(Classifier::new(vs, net))
    }

    /// Build a model and load its checkpoint weights.
    pub fn load_model(&self, name: &str, weights: &Path) -> Result<Classifier> {
        let mut classifier = self.build_model(name)?;
        classifier
            .load(weights)
            .with_context(|| format!("Failed to load weights for model {name}"))?;
        info!(model = %name, path = %weights.display(), "model weights loaded");
        Ok(classifier)
    }

    /// Build the ensemble from a JSON config mapping model names to weight
    /// files. Models are instantiated in sorted name order, which is also
    /// the tie-break order of the ensemble vote.
    pub fn load_ensemble(&self, config_path: &Path) -> Result<EnsembleClassifier> {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read ensemble config {:?}", config_path))?;
        let entries: BTreeMap<String, PathBuf> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse ensemble config {:?}", config_path))?;
        anyhow::ensure!(
            !entries.is_empty(),
            "Ensemble config {:?} names no models",
            config_path
        );

        let mut models = Vec::with_capacity(entries.len());
        for (name, weights) in &entries {
            models.push((name.clone(), self.load_model(name, weights)?));
        }
        EnsembleClassifier::new(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Kind, Tensor};

    #[test]
    fn test_architecture_from_model_name() {
        assert_eq!(
            Architecture::from_model_name("resnet18_v1").unwrap(),
            Architecture::Resnet18
        );
        assert_eq!(
            Architecture::from_model_name("densenet121_fold2").unwrap(),
            Architecture::Densenet121
        );
        assert_eq!(
            Architecture::from_model_name("vgg16").unwrap(),
            Architecture::Vgg16
        );

        let err = Architecture::from_model_name("mobilenet_v3").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownArchitecture(_))
        ));
    }

    #[test]
    fn test_build_model_predicts_in_class_range() {
        let loader = ModelLoader::new(2, Device::Cpu);
        let clf = loader.build_model("resnet18_v1").unwrap();
        let images = Tensor::zeros([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let preds = clf.predict(&images).unwrap();
        assert_eq!(preds.len(), 2);
        assert!(preds.iter().all(|&p| (0..2).contains(&p)));
    }

    #[test]
    fn test_load_ensemble_rejects_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.json");
        fs::write(&path, "{}").unwrap();

        let loader = ModelLoader::new(2, Device::Cpu);
        assert!(loader.load_ensemble(&path).is_err());
    }

    #[test]
    fn test_load_ensemble_missing_config_fails() {
        let loader = ModelLoader::new(2, Device::Cpu);
        assert!(loader
            .load_ensemble(Path::new("does/not/exist.json"))
            .is_err());
    }
}
