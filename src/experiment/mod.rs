//! Baseline comparison under a fixed temporal split.
//!
//! Training years [1950, 2001], validation (2001, 2008], test
//! [2009, 2023]. The scaler is fit on training years only. Three
//! models train with the same hyperparameters and early-stopping
//! policy; evaluation conditions on the last W known values strictly
//! before the test period and scores point forecasts out to the last
//! test year.

pub mod baselines;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::Config;
use crate::data::{
    EntityCatalog, MeanScaler, PreparedData, Preprocessor, WindowBatcher, WindowDataset,
};
use crate::error::Error;
use crate::inference::Predictor;
use crate::metrics::{compute_all, MetricReport};
use crate::model::{DeepAr, DeepArConfig};
use crate::training::Trainer;
use crate::FIRST_YEAR;

use baselines::{
    MultiSeriesLstm, MultiSeriesLstmConfig, SingleSeriesLstm, SingleSeriesLstmConfig, ValueBatcher,
};

pub const TRAIN_END: i32 = 2001;
pub const VAL_END: i32 = 2008;
pub const TEST_START: i32 = 2009;

/// Entity used for the single-series comparison.
pub const DESIGNATED_ENTITY: &str = "Vietnam";

/// Monte-Carlo budget for the designated-entity probe (point
/// forecasts themselves are deterministic).
const EVAL_SAMPLES: usize = 500;

/// Point-forecast scores for all three models.
pub struct ExperimentReport {
    /// Designated entity: proposed, single-series, multi-series.
    pub designated: [Option<MetricReport>; 3],
    /// Pooled across entities with full conditioning history:
    /// proposed vs multi-series.
    pub pooled: [Option<MetricReport>; 2],
}

pub fn run_experiments<B: AutodiffBackend>(
    config: &Config,
    artifact_dir: &Path,
    device: B::Device,
    designated: &str,
) -> Result<ExperimentReport, Error> {
    std::fs::create_dir_all(artifact_dir)?;
    let window = config.data.window_size;

    log::info!("experiment: proposed model vs baselines");
    log::info!("  train {FIRST_YEAR}-{TRAIN_END} | val {}-{VAL_END} | test {TEST_START}-", TRAIN_END + 1);
    log::info!("  designated entity: {designated}");

    let prep = Preprocessor::new(&config.data.csv_path, &config.data.non_countries).load()?;

    // scaler from training years only, to keep the test range unseen
    let train_values: Vec<(&str, Vec<f64>)> = prep
        .series
        .iter()
        .map(|(name, series)| {
            let values = series
                .years
                .iter()
                .zip(&series.values)
                .filter(|(year, _)| **year <= TRAIN_END as f64)
                .map(|(_, value)| *value)
                .collect();
            (name.as_str(), values)
        })
        .collect();
    let scaler = MeanScaler::fit(train_values.iter().map(|(name, v)| (*name, v.as_slice())));

    let training_start = Instant::now();
    let trainer = Trainer::new(&config.training, artifact_dir);

    let proposed = train_proposed::<B>(config, &prep, &scaler, &trainer, &device)?;
    let multi = train_multi::<B>(config, &prep, &scaler, &trainer, &device)?;
    let single = train_single::<B>(config, &prep, &scaler, &trainer, &device, designated)?;
    log::info!(
        "total training time: {:.1}s",
        training_start.elapsed().as_secs_f32()
    );

    let predictor = Predictor::new(
        proposed,
        scaler.clone(),
        prep.catalog.clone(),
        device.clone(),
        EVAL_SAMPLES,
    );

    // experiment 1: designated entity, all three models
    let proposed_designated = eval_proposed_entity(&predictor, &prep, designated, window);
    let single_designated = single
        .as_ref()
        .and_then(|model| eval_single_entity(model, &prep, &scaler, designated, window, &device));
    let multi_designated = eval_multi_entity(&multi, &prep, &scaler, designated, window, &device);

    log_table(
        &format!("experiment 1: designated entity ({designated})"),
        &["proposed", "single-series", "multi-series"],
        &[
            proposed_designated.as_ref(),
            single_designated.as_ref(),
            multi_designated.as_ref(),
        ],
    );

    // experiment 2: pooled across entities with full history
    let proposed_pooled = eval_proposed_pooled(&predictor, &prep, window);
    let multi_pooled = eval_multi_pooled(&multi, &prep, &scaler, window, &device);

    log_table(
        "experiment 2: pooled across entities",
        &["proposed", "multi-series"],
        &[proposed_pooled.as_ref(), multi_pooled.as_ref()],
    );

    Ok(ExperimentReport {
        designated: [proposed_designated, single_designated, multi_designated],
        pooled: [proposed_pooled, multi_pooled],
    })
}

fn window_datasets(
    prep: &PreparedData,
    scaler: &MeanScaler,
    window: usize,
) -> (WindowDataset, WindowDataset) {
    let train = WindowDataset::new(prep, scaler, window, FIRST_YEAR, TRAIN_END, None);
    // held-out windows must reach past the training boundary
    let val = WindowDataset::new(prep, scaler, window, FIRST_YEAR, VAL_END, Some(TRAIN_END + 1));
    (train, val)
}

fn train_proposed<B: AutodiffBackend>(
    config: &Config,
    prep: &PreparedData,
    scaler: &MeanScaler,
    trainer: &Trainer,
    device: &B::Device,
) -> Result<DeepAr<B::InnerBackend>, Error> {
    log::info!("training proposed model");
    let (train_ds, val_ds) = window_datasets(prep, scaler, config.data.window_size);

    let train_loader = DataLoaderBuilder::new(WindowBatcher::<B>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .shuffle(42)
        .num_workers(2)
        .build(train_ds);
    let val_loader = DataLoaderBuilder::new(WindowBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .build(val_ds);

    let model = DeepArConfig::new(prep.catalog.len())
        .with_embedding_dim(config.model.embedding_dim)
        .with_hidden_size(config.model.hidden_size)
        .with_num_layers(config.model.num_layers)
        .with_dropout(config.model.dropout)
        .init::<B>(device);

    let (model, _, _) = trainer.fit::<B, _>(
        model,
        train_loader,
        Some(val_loader),
        config.training.epochs,
        "exp_deepar",
    )?;
    let model = trainer.load_best::<B, _>(model, "exp_deepar")?;
    Ok(model.valid())
}

fn train_multi<B: AutodiffBackend>(
    config: &Config,
    prep: &PreparedData,
    scaler: &MeanScaler,
    trainer: &Trainer,
    device: &B::Device,
) -> Result<MultiSeriesLstm<B::InnerBackend>, Error> {
    log::info!("training multi-series baseline");
    let (train_ds, val_ds) = window_datasets(prep, scaler, config.data.window_size);

    let train_loader = DataLoaderBuilder::new(WindowBatcher::<B>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .shuffle(42)
        .num_workers(2)
        .build(train_ds);
    let val_loader = DataLoaderBuilder::new(WindowBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .build(val_ds);

    let model = MultiSeriesLstmConfig::new(prep.catalog.len())
        .with_embedding_dim(config.model.embedding_dim)
        .with_hidden_size(config.model.hidden_size)
        .with_num_layers(config.model.num_layers)
        .with_dropout(config.model.dropout)
        .init::<B>(device);

    let (model, _, _) = trainer.fit::<B, _>(
        model,
        train_loader,
        Some(val_loader),
        config.training.epochs,
        "exp_multi",
    )?;
    let model = trainer.load_best::<B, _>(model, "exp_multi")?;
    Ok(model.valid())
}

fn train_single<B: AutodiffBackend>(
    config: &Config,
    prep: &PreparedData,
    scaler: &MeanScaler,
    trainer: &Trainer,
    device: &B::Device,
    designated: &str,
) -> Result<Option<SingleSeriesLstm<B::InnerBackend>>, Error> {
    log::info!("training single-series baseline on {designated}");
    let Some(view) = single_entity_view(prep, designated) else {
        log::warn!("no data for {designated}; skipping single-series baseline");
        return Ok(None);
    };

    let (train_ds, val_ds) = window_datasets(&view, scaler, config.data.window_size);
    if train_ds.is_empty() {
        log::warn!("no training windows for {designated}; skipping single-series baseline");
        return Ok(None);
    }

    let train_loader = DataLoaderBuilder::new(ValueBatcher::<B>::new(device.clone()))
        .batch_size(32)
        .shuffle(42)
        .build(train_ds);
    let val_loader = (!val_ds.is_empty()).then(|| {
        DataLoaderBuilder::new(ValueBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(32)
            .build(val_ds)
    });

    let model = SingleSeriesLstmConfig::new()
        .with_hidden_size(config.model.hidden_size)
        .with_num_layers(config.model.num_layers)
        .with_dropout(config.model.dropout)
        .init::<B>(device);

    let (model, _, _) = trainer.fit::<B, _>(
        model,
        train_loader,
        val_loader,
        config.training.epochs,
        "exp_single",
    )?;
    let model = trainer.load_best::<B, _>(model, "exp_single")?;
    Ok(Some(model.valid()))
}

/// A one-entity slice of the prepared data, for the single-series
/// baseline.
fn single_entity_view(prep: &PreparedData, entity: &str) -> Option<PreparedData> {
    let series = prep.series.get(entity)?.clone();
    let mut map = BTreeMap::new();
    map.insert(entity.to_string(), series);
    Some(PreparedData {
        series: map,
        catalog: EntityCatalog::from_names([entity]),
    })
}

/// Last `window` observations strictly before the test period.
fn conditioning_slice(
    prep: &PreparedData,
    entity: &str,
    window: usize,
) -> Option<(Vec<f64>, Vec<f64>)> {
    let series = prep.series.get(entity)?;
    let known: Vec<(f64, f64)> = series
        .years
        .iter()
        .zip(&series.values)
        .filter(|(year, _)| **year < TEST_START as f64)
        .map(|(year, value)| (*year, *value))
        .collect();
    let start = known.len().saturating_sub(window);
    let tail = &known[start..];
    Some((
        tail.iter().map(|(_, v)| *v).collect(),
        tail.iter().map(|(y, _)| *y).collect(),
    ))
}

/// Test-period (years, actuals).
fn test_slice(prep: &PreparedData, entity: &str) -> Option<(Vec<f64>, Vec<f64>)> {
    let series = prep.series.get(entity)?;
    let pairs: Vec<(f64, f64)> = series
        .years
        .iter()
        .zip(&series.values)
        .filter(|(year, _)| **year >= TEST_START as f64)
        .map(|(year, value)| (*year, *value))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    Some((
        pairs.iter().map(|(y, _)| *y).collect(),
        pairs.iter().map(|(_, v)| *v).collect(),
    ))
}

fn scored(actuals: &[f64], predictions: &[f64]) -> MetricReport {
    let n = actuals.len().min(predictions.len());
    compute_all(&actuals[..n], &predictions[..n])
}

fn eval_proposed_entity<B: burn::tensor::backend::Backend>(
    predictor: &Predictor<B>,
    prep: &PreparedData,
    entity: &str,
    window: usize,
) -> Option<MetricReport> {
    let (cond_values, cond_years) = conditioning_slice(prep, entity, window)?;
    let (test_years, test_values) = test_slice(prep, entity)?;
    let predictions = predictor
        .predict_point(entity, &cond_values, &cond_years, *test_years.last()? as i32)
        .ok()?;
    Some(scored(&test_values, &predictions))
}

fn eval_proposed_pooled<B: burn::tensor::backend::Backend>(
    predictor: &Predictor<B>,
    prep: &PreparedData,
    window: usize,
) -> Option<MetricReport> {
    let pairs: Vec<(Vec<f64>, Vec<f64>)> = prep
        .catalog
        .names()
        .par_iter()
        .filter_map(|entity| {
            let (cond_values, cond_years) = conditioning_slice(prep, entity, window)?;
            if cond_values.len() < window {
                return None;
            }
            let (test_years, test_values) = test_slice(prep, entity)?;
            let predictions = predictor
                .predict_point(entity, &cond_values, &cond_years, *test_years.last()? as i32)
                .ok()?;
            let n = test_values.len().min(predictions.len());
            Some((test_values[..n].to_vec(), predictions[..n].to_vec()))
        })
        .collect();
    pool(pairs)
}

fn eval_single_entity<B: burn::tensor::backend::Backend>(
    model: &SingleSeriesLstm<B>,
    prep: &PreparedData,
    scaler: &MeanScaler,
    entity: &str,
    window: usize,
    device: &B::Device,
) -> Option<MetricReport> {
    let (cond_values, _) = conditioning_slice(prep, entity, window)?;
    let (_, test_values) = test_slice(prep, entity)?;
    let scaled = scaler.transform(entity, &cond_values);
    let predictions = model.autoregressive_predict(
        &scaled,
        test_values.len(),
        scaler.get_scale(entity),
        device,
    );
    Some(scored(&test_values, &predictions))
}

fn eval_multi_entity<B: burn::tensor::backend::Backend>(
    model: &MultiSeriesLstm<B>,
    prep: &PreparedData,
    scaler: &MeanScaler,
    entity: &str,
    window: usize,
    device: &B::Device,
) -> Option<MetricReport> {
    let entity_index = prep.catalog.index_of(entity)?;
    let (_, cond_years) = conditioning_slice(prep, entity, window)?;
    let (test_years, test_values) = test_slice(prep, entity)?;
    let predictions = model.autoregressive_predict(
        entity_index,
        &cond_years,
        &test_years,
        scaler.get_scale(entity),
        device,
    );
    Some(scored(&test_values, &predictions))
}

fn eval_multi_pooled<B: burn::tensor::backend::Backend>(
    model: &MultiSeriesLstm<B>,
    prep: &PreparedData,
    scaler: &MeanScaler,
    window: usize,
    device: &B::Device,
) -> Option<MetricReport> {
    let pairs: Vec<(Vec<f64>, Vec<f64>)> = prep
        .catalog
        .names()
        .par_iter()
        .filter_map(|entity| {
            let entity_index = prep.catalog.index_of(entity)?;
            let (cond_values, cond_years) = conditioning_slice(prep, entity, window)?;
            if cond_values.len() < window {
                return None;
            }
            let (test_years, test_values) = test_slice(prep, entity)?;
            let predictions = model.autoregressive_predict(
                entity_index,
                &cond_years,
                &test_years,
                scaler.get_scale(entity),
                device,
            );
            let n = test_values.len().min(predictions.len());
            Some((test_values[..n].to_vec(), predictions[..n].to_vec()))
        })
        .collect();
    pool(pairs)
}

fn pool(pairs: Vec<(Vec<f64>, Vec<f64>)>) -> Option<MetricReport> {
    if pairs.is_empty() {
        return None;
    }
    let mut actuals = Vec::new();
    let mut predictions = Vec::new();
    for (t, p) in pairs {
        actuals.extend(t);
        predictions.extend(p);
    }
    Some(compute_all(&actuals, &predictions))
}

fn log_table(title: &str, models: &[&str], reports: &[Option<&MetricReport>]) {
    log::info!("{title}");

    let mut header = format!("{:<12}", "metric");
    for model in models {
        header.push_str(&format!("{model:>18}"));
    }
    log::info!("{header}");

    let fields: [(&str, fn(&MetricReport) -> f64); 4] = [
        ("RMSE", |r| r.rmse),
        ("MAE", |r| r.mae),
        ("MAPE (%)", |r| r.mape),
        ("sMAPE (%)", |r| r.smape),
    ];
    for (name, get) in fields {
        let mut row = format!("{name:<12}");
        for report in reports {
            match report {
                Some(report) => row.push_str(&format!("{:>18.2}", get(report))),
                None => row.push_str(&format!("{:>18}", "N/A")),
            }
        }
        log::info!("{row}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    type TB = burn::backend::Autodiff<burn::backend::ndarray::NdArray<f32>>;

    fn write_fixture_csv(dir: &Path) -> PathBuf {
        let path = dir.join("population.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Country name,Year,Population,Population (%)").unwrap();
        for year in 1990..=2015 {
            writeln!(file, "A,{year},{},0.1", 1000 + (year - 1990) * 10).unwrap();
            writeln!(file, "B,{year},{},1.0", 50000 + (year - 1990) * 500).unwrap();
        }
        path
    }

    fn tiny_config(csv_path: &Path) -> Config {
        let yaml = format!(
            "data:\n  csv_path: {}\n  window_size: 3\n\
             model:\n  embedding_dim: 4\n  hidden_size: 4\n  num_layers: 1\n  dropout: 0.0\n\
             training:\n  epochs: 2\n  batch_size: 8\n  patience: 5\n",
            csv_path.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn scaler_sees_training_years_only() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_fixture_csv(dir.path());
        let prep = Preprocessor::new(&csv_path, &[]).load().unwrap();

        let train_values: Vec<(&str, Vec<f64>)> = prep
            .series
            .iter()
            .map(|(name, series)| {
                let values = series
                    .years
                    .iter()
                    .zip(&series.values)
                    .filter(|(year, _)| **year <= TRAIN_END as f64)
                    .map(|(_, value)| *value)
                    .collect();
                (name.as_str(), values)
            })
            .collect();
        let scaler = MeanScaler::fit(train_values.iter().map(|(n, v)| (*n, v.as_slice())));

        // mean of A's 1990..=2001 values, untouched by later years
        let expected: f64 = (0..=11).map(|i| 1000.0 + i as f64 * 10.0).sum::<f64>() / 12.0;
        approx::assert_relative_eq!(scaler.get_scale("A"), expected, max_relative = 1e-12);
    }

    #[test]
    fn full_harness_scores_all_models() {
        <TB as burn::tensor::backend::Backend>::seed(33);
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_fixture_csv(dir.path());
        let config = tiny_config(&csv_path);
        let artifact_dir = dir.path().join("experiments");

        let report =
            run_experiments::<TB>(&config, &artifact_dir, Default::default(), "A").unwrap();

        for metric_report in report.designated.iter().flatten() {
            assert!(metric_report.rmse.is_finite());
            assert!(metric_report.mae >= 0.0);
        }
        assert!(report.designated[0].is_some());
        assert!(report.designated[1].is_some());
        assert!(report.designated[2].is_some());
        assert!(report.pooled[0].is_some());
        assert!(report.pooled[1].is_some());

        for prefix in ["exp_deepar", "exp_multi", "exp_single"] {
            assert!(artifact_dir.join(format!("{prefix}_best.mpk")).exists());
        }
    }
}
