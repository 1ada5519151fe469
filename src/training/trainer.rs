//! Epoch loop with gradient clipping, plateau LR scheduling, early
//! stopping and best-checkpoint persistence.
//!
//! The proposed model and both experiment baselines train through the
//! same loop; each exposes its objective through [`ForecastStep`].
//! The monitored loss is the validation loss when a validation loader
//! exists, the training loss otherwise.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use burn::data::dataloader::DataLoader;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use num_traits::cast::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::TrainError;

use super::plateau::ReduceOnPlateau;

/// Full-precision checkpoint format; a reloaded model reproduces its
/// recorded validation loss.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A model the trainer can drive: maps one batch to a scalar loss.
pub trait ForecastStep<B: Backend>: Module<B> {
    type Batch;

    fn loss(&self, batch: Self::Batch) -> Tensor<B, 1>;
}

/// Per-epoch loss curves and learning rates. Epochs without a
/// validation pass record an infinite validation loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub lr: Vec<f64>,
}

pub struct Trainer {
    lr: f64,
    weight_decay: f32,
    grad_clip: f32,
    patience: usize,
    checkpoint_dir: PathBuf,
}

impl Trainer {
    pub fn new(config: &TrainingConfig, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            grad_clip: config.grad_clip,
            patience: config.patience,
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Train until the epoch budget or early stopping.
    ///
    /// Returns the final model state, the loss history and the best
    /// monitored loss. The best state is on disk under
    /// `<prefix>_best`; restore it with [`Trainer::load_best`].
    pub fn fit<B, M>(
        &self,
        mut model: M,
        train_loader: Arc<dyn DataLoader<<M as ForecastStep<B>>::Batch>>,
        val_loader: Option<
            Arc<dyn DataLoader<<M::InnerModule as ForecastStep<B::InnerBackend>>::Batch>>,
        >,
        epochs: usize,
        prefix: &str,
    ) -> Result<(M, TrainingHistory, f32), TrainError>
    where
        B: AutodiffBackend,
        M: ForecastStep<B> + AutodiffModule<B>,
        M::InnerModule: ForecastStep<B::InnerBackend>,
    {
        let mut optim = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay)))
            .with_grad_clipping(Some(GradientClippingConfig::Norm(self.grad_clip)))
            .init::<B, M>();
        let mut scheduler = ReduceOnPlateau::new(self.lr);

        let mut history = TrainingHistory::default();
        let mut best_loss = f32::INFINITY;
        let mut stale_epochs = 0usize;

        log::info!(
            "training for up to {epochs} epochs | patience {} | grad clip {}",
            self.patience,
            self.grad_clip
        );

        for epoch in 1..=epochs {
            let epoch_start = Instant::now();

            let mut total = 0.0f32;
            let mut batches = 0usize;
            for batch in train_loader.iter() {
                let loss = model.loss(batch);
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(scheduler.lr(), model, grads);
                total += loss
                    .into_scalar()
                    .to_f32()
                    .expect("loss should convert to f32");
                batches += 1;
            }
            let train_loss = total / batches.max(1) as f32;

            let val_loss = val_loader.as_ref().map(|loader| {
                let inner = model.valid();
                let mut total = 0.0f32;
                let mut batches = 0usize;
                for batch in loader.iter() {
                    total += inner
                        .loss(batch)
                        .into_scalar()
                        .to_f32()
                        .expect("loss should convert to f32");
                    batches += 1;
                }
                total / batches.max(1) as f32
            });

            let monitor = val_loss.unwrap_or(train_loss);
            let lr = scheduler.lr();
            history.train_loss.push(train_loss);
            history.val_loss.push(val_loss.unwrap_or(f32::INFINITY));
            history.lr.push(lr);
            scheduler.step(monitor);

            log::info!(
                "epoch {epoch:03}/{epochs} | train: {train_loss:.6} | val: {:.6} | lr: {lr:.2e} | {:.1}s",
                val_loss.unwrap_or(f32::INFINITY),
                epoch_start.elapsed().as_secs_f32(),
            );

            if !monitor.is_finite() {
                log::error!("non-finite loss at epoch {epoch}; stopping training");
                break;
            }

            if monitor < best_loss {
                best_loss = monitor;
                stale_epochs = 0;
                self.save_checkpoint(&model, &optim, best_loss, prefix)?;
                log::info!("  new best loss: {best_loss:.6}");
            } else {
                stale_epochs += 1;
                if stale_epochs >= self.patience {
                    log::info!("early stopping at epoch {epoch} (patience {})", self.patience);
                    break;
                }
            }
        }

        log::info!("training complete; best loss {best_loss:.6}");
        Ok((model, history, best_loss))
    }

    /// Restore the best model state written by [`Trainer::fit`]. Only
    /// the model record is loaded; optimiser state stays on disk.
    pub fn load_best<B: Backend, M: Module<B>>(
        &self,
        model: M,
        prefix: &str,
    ) -> Result<M, TrainError> {
        Ok(model.load_file(
            self.checkpoint_dir.join(format!("{prefix}_best")),
            &CheckpointRecorder::new(),
        )?)
    }

    fn save_checkpoint<B, M, O>(
        &self,
        model: &M,
        optim: &O,
        best_loss: f32,
        prefix: &str,
    ) -> Result<(), TrainError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        std::fs::create_dir_all(&self.checkpoint_dir)?;
        model.clone().save_file(
            self.checkpoint_dir.join(format!("{prefix}_best")),
            &CheckpointRecorder::new(),
        )?;
        CheckpointRecorder::new().record(
            optim.to_record(),
            self.checkpoint_dir.join(format!("{prefix}_best.optim")),
        )?;
        let meta = serde_json::to_vec_pretty(&serde_json::json!({ "best_loss": best_loss }))?;
        std::fs::write(
            self.checkpoint_dir.join(format!("{prefix}_best.meta.json")),
            meta,
        )?;
        Ok(())
    }
}
