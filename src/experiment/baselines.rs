//! Baseline models for the comparison experiment.
//!
//! Both share the proposed model's backbone and training loop but
//! regress a point value with MSE instead of a distribution:
//!
//! - [`SingleSeriesLstm`] sees only z_{t-1} (no entity, no year) and
//!   trains on one designated entity.
//! - [`MultiSeriesLstm`] sees entity embedding + year features but no
//!   previous-value channel.

use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Int, Shape, Tensor};

use crate::data::{WindowBatch, WindowSample};
use crate::model::{EntityEmbedding, StackState, StackedLstm, YearEncoder, YEAR_FEATURES};
use crate::training::{mse, ForecastStep};

/// Autoregressive point-forecast LSTM for one series.
#[derive(Module, Debug)]
pub struct SingleSeriesLstm<B: Backend> {
    backbone: StackedLstm<B>,
    head: Linear<B>,
}

#[derive(Config, Debug)]
pub struct SingleSeriesLstmConfig {
    #[config(default = 64)]
    pub hidden_size: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl SingleSeriesLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SingleSeriesLstm<B> {
        let model = SingleSeriesLstm {
            backbone: StackedLstm::new(1, self.hidden_size, self.num_layers, self.dropout, device),
            head: LinearConfig::new(self.hidden_size, 1).init(),
        };
        model.to_device(device)
    }
}

impl<B: Backend> SingleSeriesLstm<B> {
    pub fn step(
        &self,
        z_prev: Tensor<B, 1>,
        state: Option<StackState<B>>,
    ) -> (Tensor<B, 1>, StackState<B>) {
        let [batch] = z_prev.dims();
        let (hidden, state) = self.backbone.step(z_prev.reshape([batch, 1]), state);
        (self.head.forward(hidden).reshape([batch]), state)
    }

    /// Teacher-forced pass over (batch, W) scaled values.
    pub fn forward(&self, values: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, seq] = values.dims();
        let device = values.device();

        let z_prev = {
            let zeros = Tensor::zeros_device([batch, seq], &device);
            if seq > 1 {
                zeros.slice_assign(
                    [0..batch, 1..seq],
                    values.clone().slice([0..batch, 0..seq - 1]),
                )
            } else {
                zeros
            }
        };

        let hidden = self.backbone.forward(z_prev.reshape([batch, seq, 1]));
        self.head
            .forward(hidden.reshape([batch * seq, self.backbone.d_hidden()]))
            .reshape([batch, seq])
    }

    /// Condition on known (scaled) values, then free-run.
    pub fn autoregressive_predict(
        &self,
        conditioning: &[f64],
        steps: usize,
        scale: f64,
        device: &B::Device,
    ) -> Vec<f64> {
        let mut state = None;
        let mut z_prev: Tensor<B, 1> = Tensor::zeros_device([1], device);
        for &value in conditioning {
            let (_, new_state) = self.step(z_prev, state);
            state = Some(new_state);
            z_prev = Tensor::ones_device([1], device).mul_scalar(value as f32);
        }

        let mut predictions = Vec::with_capacity(steps);
        for _ in 0..steps {
            let (pred, new_state) = self.step(z_prev, state);
            state = Some(new_state);
            z_prev = pred.clone();
            let value = pred.into_data().convert::<f32>().value[0] as f64;
            predictions.push((value * scale).max(0.0));
        }
        predictions
    }
}

/// Batch of windows reduced to their value sequences.
#[derive(Debug, Clone)]
pub struct ValueBatch<B: Backend> {
    pub values: Tensor<B, 2>,
}

#[derive(Debug, Clone)]
pub struct ValueBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ValueBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<WindowSample, ValueBatch<B>> for ValueBatcher<B> {
    fn batch(&self, items: Vec<WindowSample>) -> ValueBatch<B> {
        let batch = items.len();
        let window = items.first().map(|s| s.values.len()).unwrap_or_default();
        let values: Vec<f32> = items.iter().flat_map(|s| s.values.iter().copied()).collect();
        ValueBatch {
            values: Tensor::from_data(Data::new(values, Shape::new([batch, window])).convert())
                .to_device(&self.device),
        }
    }
}

impl<B: Backend> ForecastStep<B> for SingleSeriesLstm<B> {
    type Batch = ValueBatch<B>;

    fn loss(&self, batch: ValueBatch<B>) -> Tensor<B, 1> {
        mse(self.forward(batch.values.clone()), batch.values)
    }
}

/// Covariate-only point-forecast LSTM over all entities.
#[derive(Module, Debug)]
pub struct MultiSeriesLstm<B: Backend> {
    embedding: EntityEmbedding<B>,
    year_encoder: YearEncoder<B>,
    backbone: StackedLstm<B>,
    head: Linear<B>,
}

#[derive(Config, Debug)]
pub struct MultiSeriesLstmConfig {
    pub num_entities: usize,
    #[config(default = 32)]
    pub embedding_dim: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl MultiSeriesLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MultiSeriesLstm<B> {
        let model = MultiSeriesLstm {
            embedding: EntityEmbedding::new(self.num_entities, self.embedding_dim, device),
            year_encoder: YearEncoder::new(),
            backbone: StackedLstm::new(
                self.embedding_dim + YEAR_FEATURES,
                self.hidden_size,
                self.num_layers,
                self.dropout,
                device,
            ),
            head: LinearConfig::new(self.hidden_size, 1).init(),
        };
        model.to_device(device)
    }
}

impl<B: Backend> MultiSeriesLstm<B> {
    pub fn step(
        &self,
        entity_emb: Tensor<B, 2>,
        year_feat: Tensor<B, 2>,
        state: Option<StackState<B>>,
    ) -> (Tensor<B, 1>, StackState<B>) {
        let [batch, _] = entity_emb.dims();
        let input = Tensor::cat(vec![entity_emb, year_feat], 1);
        let (hidden, state) = self.backbone.step(input, state);
        (self.head.forward(hidden).reshape([batch]), state)
    }

    /// Point predictions from covariates alone.
    pub fn forward(&self, entity_idx: Tensor<B, 1, Int>, years: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, seq] = years.dims();
        let entity_emb = self
            .embedding
            .forward(entity_idx)
            .reshape([batch, 1, self.embedding.dim()])
            .repeat(1, seq);
        let year_feat = self
            .year_encoder
            .forward(years.reshape([batch * seq, 1]))
            .reshape([batch, seq, YEAR_FEATURES]);

        let hidden = self.backbone.forward(Tensor::cat(vec![entity_emb, year_feat], 2));
        self.head
            .forward(hidden.reshape([batch * seq, self.backbone.d_hidden()]))
            .reshape([batch, seq])
    }

    /// Build recurrent state over the conditioning years, then predict
    /// each future year. With no previous-value channel, conditioning
    /// content is entirely year-encoded.
    pub fn autoregressive_predict(
        &self,
        entity_index: usize,
        conditioning_years: &[f64],
        future_years: &[f64],
        scale: f64,
        device: &B::Device,
    ) -> Vec<f64> {
        let indices: Tensor<B, 1, Int> =
            Tensor::from_data(Data::new(vec![entity_index as i64], Shape::new([1])).convert())
                .to_device(device);
        let entity_emb = self.embedding.forward(indices);

        let year_feat = |year: f64| {
            let years = Tensor::ones_device([1, 1], device).mul_scalar(year as f32);
            self.year_encoder.forward(years)
        };

        let mut state = None;
        for &year in conditioning_years {
            let (_, new_state) = self.step(entity_emb.clone(), year_feat(year), state);
            state = Some(new_state);
        }

        let mut predictions = Vec::with_capacity(future_years.len());
        for &year in future_years {
            let (pred, new_state) = self.step(entity_emb.clone(), year_feat(year), state);
            state = Some(new_state);
            let value = pred.into_data().convert::<f32>().value[0] as f64;
            predictions.push((value * scale).max(0.0));
        }
        predictions
    }
}

impl<B: Backend> ForecastStep<B> for MultiSeriesLstm<B> {
    type Batch = WindowBatch<B>;

    fn loss(&self, batch: WindowBatch<B>) -> Tensor<B, 1> {
        mse(self.forward(batch.entity_idx, batch.years), batch.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn single_series_forward_and_free_run() {
        <B as Backend>::seed(21);
        let device = Default::default();
        let model = SingleSeriesLstmConfig::new()
            .with_hidden_size(4)
            .with_num_layers(1)
            .with_dropout(0.0)
            .init::<B>(&device);

        let values = Tensor::from_data(Data::new(
            vec![0.2_f32, 0.4, 0.6, 0.1, 0.2, 0.3],
            Shape::new([2, 3]),
        ));
        let preds = model.forward(values);
        assert_eq!(preds.dims(), [2, 3]);

        let out = model.autoregressive_predict(&[0.2, 0.4, 0.6], 4, 30.0, &device);
        assert_eq!(out.len(), 4);
        for v in out {
            assert!(v.is_finite() && v >= 0.0);
        }
    }

    #[test]
    fn multi_series_ignores_values_entirely() {
        <B as Backend>::seed(22);
        let device = Default::default();
        let model = MultiSeriesLstmConfig::new(3)
            .with_embedding_dim(4)
            .with_hidden_size(4)
            .with_num_layers(1)
            .with_dropout(0.0)
            .init::<B>(&device);

        let entity_idx = Tensor::from_data(Data::new(vec![1_i64], Shape::new([1])).convert());
        let years = Tensor::from_data(Data::new(
            vec![2000.0_f32, 2001.0, 2002.0],
            Shape::new([1, 3]),
        ));
        let preds = model.forward(entity_idx, years);
        assert_eq!(preds.dims(), [1, 3]);

        let out = model.autoregressive_predict(
            1,
            &[2004.0, 2005.0, 2006.0],
            &[2007.0, 2008.0],
            300.0,
            &device,
        );
        assert_eq!(out.len(), 2);
        for v in out {
            assert!(v.is_finite() && v >= 0.0);
        }
    }
}
