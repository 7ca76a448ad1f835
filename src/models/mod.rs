//! Model wrapper, transfer-learning loader, and ensemble voting

pub mod classifier;
pub mod ensemble;
pub mod loader;

pub use classifier::Classifier;
pub use ensemble::EnsembleClassifier;
pub use loader::ModelLoader;

#[cfg(test)]
pub(crate) mod test_support {
    use super::classifier::Classifier;
    use tch::{nn, Device, Kind, Tensor};

    /// A classifier whose logits always favor `label`, regardless of input.
    pub fn constant_classifier(label: i64, num_classes: i64) -> Classifier {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = nn::func_t(move |xs, _train| {
            let batch = xs.size()[0];
            let logits = Tensor::zeros([batch, num_classes], (Kind::Float, xs.device()));
            let mut peak = logits.narrow(1, label, 1);
            let _ = peak.fill_(1.0);
            logits
        });
        Classifier::new(vs, Box::new(net))
    }

    /// A trainable single-layer classifier over flattened inputs.
    pub fn linear_classifier(in_dim: i64, num_classes: i64) -> Classifier {
        let vs = nn::VarStore::new(Device::Cpu);
        let linear = nn::linear(&vs.root() / "fc", in_dim, num_classes, Default::default());
        let net = nn::func_t(move |xs, _train| xs.view([-1, in_dim]).apply(&linear));
        Classifier::new(vs, Box::new(net))
    }
}
