//! Sliding-window samples over the per-entity series.
//!
//! Every length-W contiguous sub-window of an entity's observations
//! inside the configured year range becomes one training sample.
//! Entities with fewer than W observations in range are skipped.
//! `end_year_min` admits only windows whose last year reaches the
//! bound; temporal splits use it to build held-out window sets that
//! straddle the split boundary.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Int, Shape, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::preprocessor::PreparedData;
use super::scaler::MeanScaler;

/// One fixed-length window. `scale` is carried for convenience only
/// and is never fed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    pub entity_index: i64,
    /// Scaled values, length W.
    pub values: Vec<f32>,
    /// Raw calendar years, length W.
    pub years: Vec<f32>,
    pub scale: f32,
}

pub struct WindowDataset {
    samples: Vec<WindowSample>,
    window_size: usize,
}

impl WindowDataset {
    pub fn new(
        data: &PreparedData,
        scaler: &MeanScaler,
        window_size: usize,
        year_min: i32,
        year_max: i32,
        end_year_min: Option<i32>,
    ) -> Self {
        let mut samples = Vec::new();

        for (entity, series) in &data.series {
            let Some(entity_index) = data.catalog.index_of(entity) else {
                continue;
            };

            let in_range: Vec<usize> = series
                .years
                .iter()
                .enumerate()
                .filter(|(_, y)| **y >= year_min as f64 && **y <= year_max as f64)
                .map(|(i, _)| i)
                .collect();
            if in_range.len() < window_size {
                continue;
            }

            let years: Vec<f64> = in_range.iter().map(|&i| series.years[i]).collect();
            let values: Vec<f64> = in_range.iter().map(|&i| series.values[i]).collect();
            let scaled = scaler.transform(entity, &values);
            let scale = scaler.get_scale(entity) as f32;

            for start in 0..=(scaled.len() - window_size) {
                let end = start + window_size;
                if let Some(bound) = end_year_min {
                    if years[end - 1] < bound as f64 {
                        continue;
                    }
                }
                samples.push(WindowSample {
                    entity_index: entity_index as i64,
                    values: scaled[start..end].iter().map(|v| *v as f32).collect(),
                    years: years[start..end].iter().map(|y| *y as f32).collect(),
                    scale,
                });
            }
        }

        Self {
            samples,
            window_size,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn samples(&self) -> &[WindowSample] {
        &self.samples
    }
}

impl Dataset<WindowSample> for WindowDataset {
    fn get(&self, index: usize) -> Option<WindowSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Batched windows on the target device.
#[derive(Debug, Clone)]
pub struct WindowBatch<B: Backend> {
    pub entity_idx: Tensor<B, 1, Int>,
    /// (batch, W) scaled values.
    pub values: Tensor<B, 2>,
    /// (batch, W) raw years.
    pub years: Tensor<B, 2>,
    pub scales: Tensor<B, 1>,
}

#[derive(Debug, Clone)]
pub struct WindowBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<WindowSample, WindowBatch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<WindowSample>) -> WindowBatch<B> {
        let batch = items.len();
        let window = items.first().map(|s| s.values.len()).unwrap_or_default();

        let entity_idx: Vec<i64> = items.iter().map(|s| s.entity_index).collect();
        let values: Vec<f32> = items.iter().flat_map(|s| s.values.iter().copied()).collect();
        let years: Vec<f32> = items.iter().flat_map(|s| s.years.iter().copied()).collect();
        let scales: Vec<f32> = items.iter().map(|s| s.scale).collect();

        WindowBatch {
            entity_idx: Tensor::from_data(Data::new(entity_idx, Shape::new([batch])).convert())
                .to_device(&self.device),
            values: Tensor::from_data(Data::new(values, Shape::new([batch, window])).convert())
                .to_device(&self.device),
            years: Tensor::from_data(Data::new(years, Shape::new([batch, window])).convert())
                .to_device(&self.device),
            scales: Tensor::from_data(Data::new(scales, Shape::new([batch])).convert())
                .to_device(&self.device),
        }
    }
}

/// An index view over another dataset.
pub struct SubsetDataset<D> {
    dataset: Arc<D>,
    indices: Vec<usize>,
}

impl<D> SubsetDataset<D> {
    pub fn new(dataset: Arc<D>, indices: Vec<usize>) -> Self {
        Self { dataset, indices }
    }
}

impl<I, D: Dataset<I>> Dataset<I> for SubsetDataset<D> {
    fn get(&self, index: usize) -> Option<I> {
        self.dataset.get(*self.indices.get(index)?)
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Split a dataset into (train, validation) views by a seeded random
/// permutation. The validation part holds `val_fraction` of the
/// samples, at least one.
pub fn random_split<I, D: Dataset<I>>(
    dataset: D,
    val_fraction: f64,
    seed: u64,
) -> (SubsetDataset<D>, SubsetDataset<D>) {
    let n = dataset.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));

    let val_size = ((n as f64 * val_fraction) as usize).max(1).min(n);
    let train_size = n - val_size;

    let dataset = Arc::new(dataset);
    let train = SubsetDataset::new(Arc::clone(&dataset), indices[..train_size].to_vec());
    let val = SubsetDataset::new(dataset, indices[train_size..].to_vec());
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::preprocessor::{EntityCatalog, Series};
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    /// A = [10..50] over 2000..2004, B = [100..500] over the same years.
    pub(crate) fn two_entity_fixture() -> (PreparedData, MeanScaler) {
        let mut series = BTreeMap::new();
        series.insert(
            "A".to_string(),
            Series {
                years: (2000..=2004).map(|y| y as f64).collect(),
                values: vec![10.0, 20.0, 30.0, 40.0, 50.0],
            },
        );
        series.insert(
            "B".to_string(),
            Series {
                years: (2000..=2004).map(|y| y as f64).collect(),
                values: vec![100.0, 200.0, 300.0, 400.0, 500.0],
            },
        );
        let catalog = EntityCatalog::from_names(series.keys().cloned());
        let scaler = MeanScaler::fit(series.iter().map(|(k, s)| (k.as_str(), s.values.as_slice())));
        (PreparedData { series, catalog }, scaler)
    }

    #[test]
    fn emits_every_window_with_stride_one() {
        let (data, scaler) = two_entity_fixture();
        let dataset = WindowDataset::new(&data, &scaler, 3, 1950, 2023, None);
        // 3 windows per entity
        assert_eq!(dataset.len(), 6);

        let first_a = dataset
            .samples()
            .iter()
            .find(|s| s.entity_index == 0)
            .unwrap();
        assert_relative_eq!(first_a.values[0], 10.0 / 30.0);
        assert_relative_eq!(first_a.values[1], 20.0 / 30.0);
        assert_relative_eq!(first_a.values[2], 1.0);
        assert_eq!(first_a.years, vec![2000.0, 2001.0, 2002.0]);
        assert_relative_eq!(first_a.scale, 30.0);
    }

    #[test]
    fn windows_respect_year_bounds() {
        let (data, scaler) = two_entity_fixture();
        let dataset = WindowDataset::new(&data, &scaler, 3, 2001, 2004, None);
        assert_eq!(dataset.len(), 4);
        for sample in dataset.samples() {
            assert_eq!(sample.values.len(), 3);
            for year in &sample.years {
                assert!(*year >= 2001.0 && *year <= 2004.0);
            }
        }
    }

    #[test]
    fn end_year_min_filters_early_windows() {
        let (data, scaler) = two_entity_fixture();
        let dataset = WindowDataset::new(&data, &scaler, 3, 1950, 2023, Some(2002));
        for sample in dataset.samples() {
            assert!(*sample.years.last().unwrap() >= 2002.0);
        }
        // the 2000..2002 window survives, nothing earlier exists
        assert_eq!(dataset.len(), 6);
        let strict = WindowDataset::new(&data, &scaler, 3, 1950, 2023, Some(2004));
        assert_eq!(strict.len(), 2);
    }

    #[test]
    fn short_series_are_skipped_silently() {
        let (data, scaler) = two_entity_fixture();
        let dataset = WindowDataset::new(&data, &scaler, 8, 1950, 2023, None);
        assert_eq!(dataset.len(), 0);
    }

    #[test]
    fn random_split_is_disjoint_and_seeded() {
        let (data, scaler) = two_entity_fixture();
        let make = || WindowDataset::new(&data, &scaler, 3, 1950, 2023, None);

        let (train_a, val_a) = random_split(make(), 0.1, 42);
        let (train_b, val_b) = random_split(make(), 0.1, 42);
        assert_eq!(train_a.len(), 5);
        assert_eq!(val_a.len(), 1);
        assert_eq!(train_a.len() + val_a.len(), 6);

        let collect = |d: &SubsetDataset<WindowDataset>| -> Vec<WindowSample> {
            (0..d.len()).map(|i| d.get(i).unwrap()).collect()
        };
        assert_eq!(collect(&train_a), collect(&train_b));
        assert_eq!(collect(&val_a), collect(&val_b));

        let val_samples = collect(&val_a);
        for sample in collect(&train_a) {
            assert!(!val_samples.contains(&sample));
        }
    }
}
