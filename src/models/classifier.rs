//! Torch model wrapper: training loop, prediction, evaluation with TTA

use crate::data::BatchStream;
use crate::error::PipelineError;
use crate::models::ensemble::majority_vote;
use crate::transforms::TtaPipeline;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::nn::{ModuleT, Optimizer, OptimizerConfig};
use tch::{nn, Device, Kind, Tensor};
use tracing::{debug, info};

/// Augmented views generated per sample during TTA evaluation
pub const TTA_VIEWS: usize = 5;

/// Loss function selection; each variant maps to its constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossKind {
    CrossEntropy,
}

impl LossKind {
    pub fn compute(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        match self {
            LossKind::CrossEntropy => logits.cross_entropy_for_logits(targets),
        }
    }
}

/// Optimizer selection; each variant maps to its constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    Sgd { weight_decay: f64 },
    Adam,
}

impl OptimizerKind {
    fn build(&self, vs: &nn::VarStore, lr: f64) -> Result<Optimizer> {
        let optimizer = match self {
            OptimizerKind::Sgd { weight_decay } => nn::Sgd {
                wd: *weight_decay,
                ..Default::default()
            }
            .build(vs, lr),
            OptimizerKind::Adam => nn::Adam::default().build(vs, lr),
        };
        optimizer.context("Failed to build optimizer")
    }
}

/// Evaluation score selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreKind {
    Accuracy,
}

impl ScoreKind {
    pub fn compute(&self, y_true: &[i64], y_pred: &[i64]) -> f64 {
        match self {
            ScoreKind::Accuracy => {
                if y_true.is_empty() {
                    return 0.0;
                }
                let correct = y_true
                    .iter()
                    .zip(y_pred.iter())
                    .filter(|(t, p)| t == p)
                    .count();
                correct as f64 / y_true.len() as f64
            }
        }
    }
}

/// Training options for [`Classifier::fit`]
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub lr: f64,
    pub loss: LossKind,
    pub optimizer: OptimizerKind,
    pub epochs: usize,
    /// When set, training resumes: epoch numbering continues past `epochs`
    /// for this many additional epochs.
    pub resume_epochs: Option<usize>,
    /// When set, weights are checkpointed after every epoch into this
    /// directory, the filename encoding epoch, losses and accuracies.
    pub checkpoint_dir: Option<PathBuf>,
    /// When set, the per-epoch accuracy history is written here as CSV.
    pub history_path: Option<PathBuf>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            lr: 0.01,
            loss: LossKind::CrossEntropy,
            optimizer: OptimizerKind::Sgd { weight_decay: 1e-3 },
            epochs: 30,
            resume_epochs: None,
            checkpoint_dir: None,
            history_path: None,
        }
    }
}

/// Test-time augmentation settings for [`Classifier::evaluate`]
pub struct TtaConfig {
    pub pipeline: TtaPipeline,
    pub views: usize,
}

impl TtaConfig {
    pub fn new(pipeline: TtaPipeline) -> Self {
        Self {
            pipeline,
            views: TTA_VIEWS,
        }
    }
}

/// Result of an evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    /// Mean per-batch loss; present when a loss kind was supplied and TTA
    /// was disabled.
    pub mean_loss: Option<f64>,
}

/// Per-epoch accuracy history returned by [`Classifier::fit`]
#[derive(Debug, Clone, Default)]
pub struct FitReport {
    pub train_accuracy: Vec<f64>,
    pub valid_accuracy: Vec<f64>,
}

/// Wraps a torch network with its variable store and device placement.
///
/// Parameters are mutable only inside `fit`; `predict` and `evaluate` run
/// under `no_grad` with the network in eval mode.
pub struct Classifier {
    vs: nn::VarStore,
    net: Box<dyn ModuleT>,
    device: Device,
}

impl Classifier {
    pub fn new(vs: nn::VarStore, net: Box<dyn ModuleT>) -> Self {
        let device = vs.device();
        Self { vs, net, device }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Persist current weights to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs
            .save(path.as_ref())
            .with_context(|| format!("Failed to save weights to {:?}", path.as_ref()))
    }

    /// Load weights previously written by [`Classifier::save`].
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.vs
            .load(path.as_ref())
            .with_context(|| format!("Failed to load weights from {:?}", path.as_ref()))
    }

    /// Arg-max class index for every sample in `images`.
    pub fn predict(&self, images: &Tensor) -> Result<Vec<i64>> {
        let images = images.to_device(self.device);
        let preds = tch::no_grad(|| self.net.forward_t(&images, false).argmax(-1, false));
        Vec::<i64>::try_from(&preds.to_device(Device::Cpu))
            .context("Failed to read predictions off device")
    }

    /// Train for the configured number of epochs.
    ///
    /// Both streams are required; a missing one fails with
    /// [`PipelineError::InvalidArguments`] before any parameter update.
    pub fn fit(
        &mut self,
        train: Option<&mut dyn BatchStream>,
        validation: Option<&mut dyn BatchStream>,
        opts: &FitOptions,
    ) -> Result<FitReport> {
        let (train, validation) = match (train, validation) {
            (Some(t), Some(v)) => (t, v),
            _ => {
                return Err(PipelineError::InvalidArguments(
                    "training and validation streams are both required".to_string(),
                )
                .into())
            }
        };

        info!(device = ?self.device, epochs = opts.epochs, lr = opts.lr, "training started");
        let mut optimizer = opts.optimizer.build(&self.vs, opts.lr)?;

        let epoch_range = match opts.resume_epochs {
            Some(extra) => opts.epochs..opts.epochs + extra,
            None => 0..opts.epochs,
        };

        let mut report = FitReport::default();
        for epoch in epoch_range {
            let start = Instant::now();
            let mut train_loss_sum = 0.0;
            let mut batch_count = 0usize;
            let mut correct = 0i64;
            let mut seen = 0i64;

            train.reset();
            while let Some(batch) = train.next_batch()? {
                let images = batch.images.to_device(self.device);
                let labels = batch.labels.to_device(self.device);

                let logits = self.net.forward_t(&images, true);
                let loss = opts.loss.compute(&logits, &labels);
                optimizer.backward_step(&loss);

                train_loss_sum += loss.double_value(&[]);
                correct += logits
                    .argmax(-1, false)
                    .eq_tensor(&labels)
                    .sum(Kind::Int64)
                    .int64_value(&[]);
                seen += labels.size()[0];
                batch_count += 1;
            }
            if batch_count == 0 {
                return Err(PipelineError::InvalidArguments(
                    "training stream yielded no batches".to_string(),
                )
                .into());
            }

            let train_loss = train_loss_sum / batch_count as f64;
            let train_acc = correct as f64 / seen as f64;

            validation.reset();
            let eval = self.evaluate(&mut *validation, ScoreKind::Accuracy, Some(opts.loss), None)?;
            let valid_acc = eval.score;
            let valid_loss = eval.mean_loss.unwrap_or(0.0);

            info!(
                epoch = epoch + 1,
                train_loss = format!("{train_loss:.4}"),
                valid_loss = format!("{valid_loss:.4}"),
                train_acc = format!("{train_acc:.3}"),
                valid_acc = format!("{valid_acc:.3}"),
                elapsed_s = format!("{:.1}", start.elapsed().as_secs_f64()),
                "epoch complete"
            );

            report.train_accuracy.push(train_acc);
            report.valid_accuracy.push(valid_acc);

            if let Some(dir) = &opts.checkpoint_dir {
                let path = dir.join(checkpoint_filename(
                    epoch + 1,
                    train_loss,
                    valid_loss,
                    train_acc,
                    valid_acc,
                ));
                self.save(&path)?;
                debug!(path = %path.display(), "checkpoint written");
            }
        }

        if let Some(path) = &opts.history_path {
            write_history(path, &report)?;
        }

        Ok(report)
    }

    /// Score the model over a labeled stream.
    ///
    /// With TTA enabled every sample is augmented `views` times, each view
    /// predicted individually, and the per-sample label is the mode of the
    /// view predictions. Loss is only accumulated on the direct (non-TTA)
    /// path, matching the batched forward pass it is computed from.
    pub fn evaluate(
        &self,
        stream: &mut dyn BatchStream,
        score: ScoreKind,
        loss: Option<LossKind>,
        tta: Option<&TtaConfig>,
    ) -> Result<Evaluation> {
        let mut y_true: Vec<i64> = Vec::new();
        let mut y_pred: Vec<i64> = Vec::new();
        let mut loss_sum = 0.0;
        let mut batch_count = 0usize;

        stream.reset();
        while let Some(batch) = stream.next_batch()? {
            y_true.extend(Vec::<i64>::try_from(&batch.labels)?);

            match tta {
                Some(cfg) => {
                    for i in 0..batch.len() {
                        let sample = batch.images.get(i);
                        let mut votes = Vec::with_capacity(cfg.views);
                        for view in cfg.pipeline.views(&sample, cfg.views)? {
                            let pred = self.predict(&view.unsqueeze(0))?;
                            votes.push(pred[0]);
                        }
                        let label = majority_vote(&votes)
                            .context("TTA produced no predictions to vote over")?;
                        y_pred.push(label);
                    }
                }
                None => {
                    y_pred.extend(self.predict(&batch.images)?);
                    if let Some(loss_kind) = loss {
                        let images = batch.images.to_device(self.device);
                        let labels = batch.labels.to_device(self.device);
                        let batch_loss = tch::no_grad(|| {
                            loss_kind.compute(&self.net.forward_t(&images, false), &labels)
                        });
                        loss_sum += batch_loss.double_value(&[]);
                        batch_count += 1;
                    }
                }
            }
        }

        let mean_loss = if loss.is_some() && batch_count > 0 {
            Some(loss_sum / batch_count as f64)
        } else {
            None
        };

        Ok(Evaluation {
            score: score.compute(&y_true, &y_pred),
            mean_loss,
        })
    }
}

/// Checkpoint filename encoding epoch, losses and accuracies:
/// `epoch{N}_trainloss{L}_validloss{L}_trainacc{A}_validacc{A}.pth`
pub fn checkpoint_filename(
    epoch: usize,
    train_loss: f64,
    valid_loss: f64,
    train_acc: f64,
    valid_acc: f64,
) -> String {
    format!(
        "epoch{epoch}_trainloss{train_loss:.3}_validloss{valid_loss:.3}_trainacc{train_acc:.3}_validacc{valid_acc:.3}.pth"
    )
}

fn write_history(path: &Path, report: &FitReport) -> Result<()> {
    let mut csv = String::from("epoch,train_accuracy,valid_accuracy\n");
    for (i, (train, valid)) in report
        .train_accuracy
        .iter()
        .zip(report.valid_accuracy.iter())
        .enumerate()
    {
        csv.push_str(&format!("{},{:.6},{:.6}\n", i + 1, train, valid));
    }
    std::fs::write(path, csv).with_context(|| format!("Failed to write history to {:?}", path))
}
