//! Two-phase inference: condition on known history, then
//! autoregressively sample the future.
//!
//! The conditioning walk advances the recurrent state over the known
//! years teacher-forced (the produced distribution parameters are
//! discarded). The generation walk then feeds each step's own sample
//! back as the next previous-value input, with all N Monte-Carlo
//! trajectories batched along the sample dimension. Recurrent state
//! is a per-call local; concurrent calls never mutate the model.

use burn::tensor::backend::Backend;
use burn::tensor::{Data, Int, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::data::{EntityCatalog, MeanScaler};
use crate::error::ForecastError;
use crate::model::{DeepAr, GaussianHead};

/// Monte-Carlo summary of one horizon step. `lower`/`upper` bound the
/// central 95% interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub year: i32,
    pub mean: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    pub std: f64,
}

pub struct Predictor<B: Backend> {
    model: DeepAr<B>,
    scaler: MeanScaler,
    catalog: EntityCatalog,
    device: B::Device,
    num_samples: usize,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: DeepAr<B>,
        scaler: MeanScaler,
        catalog: EntityCatalog,
        device: B::Device,
        num_samples: usize,
    ) -> Self {
        Self {
            model,
            scaler,
            catalog,
            device,
            num_samples,
        }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    /// Probabilistic forecast from the last known year up to
    /// `target_year` inclusive. Returns one summary per horizon step,
    /// or an empty list when the target is not in the future.
    pub fn predict(
        &self,
        entity: &str,
        hist_values: &[f64],
        hist_years: &[f64],
        target_year: i32,
        num_samples: Option<usize>,
    ) -> Result<Vec<Forecast>, ForecastError> {
        let (entity_idx, scale, scaled_hist, last_year) =
            self.prepare(entity, hist_values, hist_years)?;
        let horizon = target_year - last_year;
        if horizon <= 0 {
            return Ok(Vec::new());
        }

        let n = num_samples.unwrap_or(self.num_samples).max(1);
        let entity_emb = self.expand_embedding(entity_idx, n);

        // conditioning: build up recurrent state over known history
        let mut state = None;
        let mut z_prev: Tensor<B, 1> = Tensor::zeros_device([n], &self.device);
        for (t, &z) in scaled_hist.iter().enumerate() {
            let year_feat = self.year_features(hist_years[t], n);
            let (_, _, new_state) = self.model.step(z_prev, entity_emb.clone(), year_feat, state);
            state = Some(new_state);
            z_prev = Tensor::ones_device([n], &self.device).mul_scalar(z);
        }

        // generation: one reparameterised draw per trajectory per step
        let mut forecasts = Vec::with_capacity(horizon as usize);
        for step in 1..=horizon {
            let year = last_year + step;
            let year_feat = self.year_features(year as f64, n);
            let (mu, sigma, new_state) =
                self.model.step(z_prev, entity_emb.clone(), year_feat, state);
            state = Some(new_state);

            let sample = GaussianHead::sample(mu, sigma);
            z_prev = sample.clone();

            let mut values: Vec<f64> = sample
                .into_data()
                .convert::<f32>()
                .value
                .into_iter()
                .map(|z| (z as f64 * scale).max(0.0))
                .collect();
            forecasts.push(summarize(year, &mut values));
        }
        Ok(forecasts)
    }

    /// Deterministic point forecast: a single trajectory that feeds mu
    /// forward instead of a sample.
    pub fn predict_point(
        &self,
        entity: &str,
        hist_values: &[f64],
        hist_years: &[f64],
        target_year: i32,
    ) -> Result<Vec<f64>, ForecastError> {
        let (entity_idx, scale, scaled_hist, last_year) =
            self.prepare(entity, hist_values, hist_years)?;
        let horizon = target_year - last_year;
        if horizon <= 0 {
            return Ok(Vec::new());
        }

        let entity_emb = self.expand_embedding(entity_idx, 1);

        let mut state = None;
        let mut z_prev: Tensor<B, 1> = Tensor::zeros_device([1], &self.device);
        for (t, &z) in scaled_hist.iter().enumerate() {
            let year_feat = self.year_features(hist_years[t], 1);
            let (_, _, new_state) = self.model.step(z_prev, entity_emb.clone(), year_feat, state);
            state = Some(new_state);
            z_prev = Tensor::ones_device([1], &self.device).mul_scalar(z);
        }

        let mut predictions = Vec::with_capacity(horizon as usize);
        for step in 1..=horizon {
            let year_feat = self.year_features((last_year + step) as f64, 1);
            let (mu, _, new_state) = self.model.step(z_prev, entity_emb.clone(), year_feat, state);
            state = Some(new_state);
            z_prev = mu.clone();

            let value = mu
                .into_data()
                .convert::<f32>()
                .value[0] as f64;
            predictions.push((value * scale).max(0.0));
        }
        Ok(predictions)
    }

    fn prepare(
        &self,
        entity: &str,
        hist_values: &[f64],
        hist_years: &[f64],
    ) -> Result<(usize, f64, Vec<f32>, i32), ForecastError> {
        let entity_idx = self
            .catalog
            .index_of(entity)
            .ok_or_else(|| ForecastError::UnknownEntity(entity.to_string()))?;
        let last_year = hist_years
            .last()
            .copied()
            .ok_or_else(|| ForecastError::ShortHistory {
                entity: entity.to_string(),
                got: 0,
                need: 1,
            })? as i32;
        let scale = self.scaler.get_scale(entity);
        let scaled_hist: Vec<f32> = hist_values.iter().map(|v| (v / scale) as f32).collect();
        Ok((entity_idx, scale, scaled_hist, last_year))
    }

    /// Broadcast the entity embedding over the sample dimension.
    fn expand_embedding(&self, entity_idx: usize, n: usize) -> Tensor<B, 2> {
        let indices: Tensor<B, 1, Int> = Tensor::from_data(
            Data::new(vec![entity_idx as i64; n], Shape::new([n])).convert(),
        )
        .to_device(&self.device);
        self.model.embed(indices)
    }

    fn year_features(&self, year: f64, n: usize) -> Tensor<B, 2> {
        let years = Tensor::ones_device([n, 1], &self.device).mul_scalar(year as f32);
        self.model.year_features(years)
    }
}

fn summarize(year: i32, values: &mut [f64]) -> Forecast {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Forecast {
        year,
        mean,
        median: percentile(values, 50.0),
        lower: percentile(values, 2.5),
        upper: percentile(values, 97.5),
        std: variance.sqrt(),
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let weight = rank - low as f64;
        sorted[low] * (1.0 - weight) + sorted[high] * weight
    }
}
