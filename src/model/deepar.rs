//! The autoregressive forecast network.
//!
//! At every step the backbone consumes [z_{t-1}, embed(entity),
//! year_features(t)] and the Gaussian head turns the hidden state into
//! (mu, sigma). Training runs the whole window teacher-forced; the
//! predictor drives the same single-step operation one year at a time.

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::{FIRST_YEAR, LAST_YEAR};

use super::gaussian::GaussianHead;
use super::init;
use super::lstm::{StackState, StackedLstm};

/// Width of the projected year covariate.
pub const YEAR_FEATURES: usize = 8;

const YEAR_HIDDEN: usize = 16;

/// Learned dense representation per entity, initialised N(0, 0.01^2).
#[derive(Module, Debug)]
pub struct EntityEmbedding<B: Backend> {
    table: Param<Tensor<B, 2>>,
}

impl<B: Backend> EntityEmbedding<B> {
    pub fn new(num_entities: usize, dim: usize, device: &B::Device) -> Self {
        Self {
            table: Param::from(init::normal([num_entities, dim], 0.01, device)),
        }
    }

    /// (batch,) indices -> (batch, dim) embeddings.
    pub fn forward(&self, entity_idx: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.table.val().select(0, entity_idx)
    }

    pub fn num_entities(&self) -> usize {
        self.table.val().dims()[0]
    }

    pub fn dim(&self) -> usize {
        self.table.val().dims()[1]
    }
}

/// Projects the normalised calendar year into a richer feature space:
/// 1 -> 16 -> ReLU -> 8.
#[derive(Module, Debug)]
pub struct YearEncoder<B: Backend> {
    hidden: Linear<B>,
    out: Linear<B>,
}

impl<B: Backend> YearEncoder<B> {
    pub fn new() -> Self {
        Self {
            hidden: LinearConfig::new(1, YEAR_HIDDEN).init(),
            out: LinearConfig::new(YEAR_HIDDEN, YEAR_FEATURES).init(),
        }
    }

    /// (batch, 1) raw years -> (batch, 8) features.
    pub fn forward(&self, years: Tensor<B, 2>) -> Tensor<B, 2> {
        let span = (LAST_YEAR - FIRST_YEAR) as f32;
        let normalized = years.sub_scalar(FIRST_YEAR as f32).div_scalar(span);
        self.out.forward(relu(self.hidden.forward(normalized)))
    }
}

#[derive(Config, Debug)]
pub struct DeepArConfig {
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

impl DeepArConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeepAr<B> {
        let model = DeepAr {
            embedding: EntityEmbedding::new(self.num_entities, self.embedding_dim, device),
            year_encoder: YearEncoder::new(),
            backbone: StackedLstm::new(
                1 + self.embedding_dim + YEAR_FEATURES,
                self.hidden_size,
                self.num_layers,
                self.dropout,
                device,
            ),
            head: GaussianHead::new(self.hidden_size),
        };
        model.to_device(device)
    }
}

#[derive(Module, Debug)]
pub struct DeepAr<B: Backend> {
    embedding: EntityEmbedding<B>,
    year_encoder: YearEncoder<B>,
    backbone: StackedLstm<B>,
    head: GaussianHead<B>,
}

impl<B: Backend> DeepAr<B> {
    pub fn embed(&self, entity_idx: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.embedding.forward(entity_idx)
    }

    pub fn year_features(&self, years: Tensor<B, 2>) -> Tensor<B, 2> {
        self.year_encoder.forward(years)
    }

    pub fn num_entities(&self) -> usize {
        self.embedding.num_entities()
    }

    /// One autoregressive step: advance the backbone with
    /// [z_prev, entity_emb, year_feat] and read (mu, sigma) off the
    /// new hidden state. Shared by the training forward and the
    /// predictor so the two paths cannot drift.
    pub fn step(
        &self,
        z_prev: Tensor<B, 1>,
        entity_emb: Tensor<B, 2>,
        year_feat: Tensor<B, 2>,
        state: Option<StackState<B>>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>, StackState<B>) {
        let [batch] = z_prev.dims();
        let input = Tensor::cat(vec![z_prev.reshape([batch, 1]), entity_emb, year_feat], 1);
        let (hidden, state) = self.backbone.step(input, state);
        let (mu, sigma) = self.head.forward(hidden);
        (mu, sigma, state)
    }

    /// Teacher-forced pass over whole windows.
    ///
    /// The previous-value channel is the scaled series shifted right
    /// by one step; position 0 sees zero. The three feature streams
    /// are concatenated along the feature axis and the backbone
    /// consumes the sequence in one call. Returns (mu, sigma), each
    /// (batch, W).
    pub fn forward(
        &self,
        entity_idx: Tensor<B, 1, Int>,
        values: Tensor<B, 2>,
        years: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, seq] = values.dims();
        let device = values.device();

        let entity_emb = self
            .embed(entity_idx)
            .reshape([batch, 1, self.embedding_dim()])
            .repeat(1, seq);
        let year_feat = self
            .year_features(years.reshape([batch * seq, 1]))
            .reshape([batch, seq, YEAR_FEATURES]);

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

        let input = Tensor::cat(
            vec![z_prev.reshape([batch, seq, 1]), entity_emb, year_feat],
            2,
        );
        let hidden = self.backbone.forward(input);

        let (mu, sigma) = self
            .head
            .forward(hidden.reshape([batch * seq, self.backbone.d_hidden()]));
        (mu.reshape([batch, seq]), sigma.reshape([batch, seq]))
    }

    fn embedding_dim(&self) -> usize {
        self.embedding.dim()
    }
}
