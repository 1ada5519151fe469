//! Per-entity mean-absolute scaling.
//!
//! Series magnitudes differ by up to six orders between entities; each
//! series is divided by the mean of its absolute values so the network
//! sees a common range. Scales are floored at 1.0, which also covers
//! all-zero and degenerate (empty or non-finite) series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanScaler {
    scales: BTreeMap<String, f64>,
}

impl MeanScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute one scale per entity from the given value arrays.
    ///
    /// Invariant: every stored scale is finite and >= 1.0.
    pub fn fit<N, V, I>(series: I) -> Self
    where
        N: AsRef<str>,
        V: AsRef<[f64]>,
        I: IntoIterator<Item = (N, V)>,
    {
        let mut scales = BTreeMap::new();
        for (entity, values) in series {
            let values = values.as_ref();
            let mean_abs = if values.is_empty() {
                0.0
            } else {
                values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
            };
            let scale = if mean_abs.is_finite() { mean_abs.max(1.0) } else { 1.0 };
            scales.insert(entity.as_ref().to_string(), scale);
        }
        Self { scales }
    }

    /// Scale factor for an entity; 1.0 when the entity was never fit.
    pub fn get_scale(&self, entity: &str) -> f64 {
        self.scales.get(entity).copied().unwrap_or(1.0)
    }

    pub fn transform(&self, entity: &str, values: &[f64]) -> Vec<f64> {
        let scale = self.get_scale(entity);
        values.iter().map(|v| v / scale).collect()
    }

    pub fn inverse_transform(&self, entity: &str, values: &[f64]) -> Vec<f64> {
        let scale = self.get_scale(entity);
        values.iter().map(|v| v * scale).collect()
    }

    pub fn state_dict(&self) -> BTreeMap<String, f64> {
        self.scales.clone()
    }

    pub fn load_state_dict(&mut self, state: BTreeMap<String, f64>) {
        self.scales = state;
    }
}
