//! Optimisation loop and its supporting pieces.

pub mod loss;
pub mod plateau;
pub mod trainer;

pub use loss::{gaussian_nll, mse};
pub use plateau::ReduceOnPlateau;
pub use trainer::{CheckpointRecorder, ForecastStep, Trainer, TrainingHistory};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::data::WindowBatch;
use crate::model::DeepAr;

impl<B: Backend> ForecastStep<B> for DeepAr<B> {
    type Batch = WindowBatch<B>;

    fn loss(&self, batch: WindowBatch<B>) -> Tensor<B, 1> {
        let (mu, sigma) = self.forward(batch.entity_idx, batch.values.clone(), batch.years);
        gaussian_nll(batch.values, mu, sigma)
    }
}
