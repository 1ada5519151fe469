//! End-to-end production training.
//!
//! One call: load data, fit the scaler on every observation, build the
//! full sliding-window dataset, split 90/10 by a seeded permutation
//! for early stopping, train to convergence and persist the artifact
//! bundle next to the best-loss checkpoint. Rerunning overwrites the
//! prior artifacts.

use std::path::{Path, PathBuf};

use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::tensor::backend::AutodiffBackend;

use crate::config::Config;
use crate::data::{random_split, MeanScaler, Preprocessor, WindowBatcher, WindowDataset};
use crate::error::Error;
use crate::model::DeepArConfig;
use crate::serve::ArtifactBundle;
use crate::training::{Trainer, TrainingHistory};
use crate::{FIRST_YEAR, LAST_YEAR};

/// Seed of the 90/10 train/validation permutation.
const SPLIT_SEED: u64 = 42;
const VAL_FRACTION: f64 = 0.1;
const CHECKPOINT_PREFIX: &str = "deepar";

pub struct PipelineArtifacts {
    pub history: TrainingHistory,
    pub best_loss: f32,
    pub bundle_path: PathBuf,
}

pub fn train_pipeline<B: AutodiffBackend>(
    config: &Config,
    artifact_dir: &Path,
    device: B::Device,
) -> Result<PipelineArtifacts, Error> {
    std::fs::create_dir_all(artifact_dir)?;

    let prep = Preprocessor::new(&config.data.csv_path, &config.data.non_countries).load()?;
    log::info!(
        "dataset: {} records, {} entities",
        prep.num_observations(),
        prep.catalog.len()
    );

    // production scaling uses every observation
    let scaler = MeanScaler::fit(
        prep.series
            .iter()
            .map(|(name, series)| (name.as_str(), series.values.as_slice())),
    );

    let full = WindowDataset::new(
        &prep,
        &scaler,
        config.data.window_size,
        FIRST_YEAR,
        LAST_YEAR,
        None,
    );
    let (train_ds, val_ds) = random_split(full, VAL_FRACTION, SPLIT_SEED);

    log::info!(
        "samples: {} train, {} val (window={})",
        train_ds.len(),
        val_ds.len(),
        config.data.window_size
    );

    let train_loader = DataLoaderBuilder::new(WindowBatcher::<B>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .shuffle(SPLIT_SEED)
        .num_workers(2)
        .build(train_ds);
    let val_loader = DataLoaderBuilder::new(WindowBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.training.batch_size)
        .num_workers(2)
        .build(val_ds);

    let model = DeepArConfig::new(prep.catalog.len())
        .with_embedding_dim(config.model.embedding_dim)
        .with_hidden_size(config.model.hidden_size)
        .with_num_layers(config.model.num_layers)
        .with_dropout(config.model.dropout)
        .init::<B>(&device);
    log::info!("model parameters: {}", model.num_params());

    let trainer = Trainer::new(&config.training, artifact_dir);
    let (_, history, best_loss) = trainer.fit::<B, _>(
        model,
        train_loader,
        Some(val_loader),
        config.training.epochs,
        CHECKPOINT_PREFIX,
    )?;

    let bundle = ArtifactBundle {
        entity_to_index: prep.catalog.entity_to_index().clone(),
        index_to_entity: prep.catalog.names().to_vec(),
        scaler_state: scaler.state_dict(),
        num_entities: prep.catalog.len(),
        config: config.clone(),
        history: history.clone(),
    };
    let bundle_path = artifact_dir.join("artifacts.bin");
    bundle.save(&bundle_path)?;
    log::info!("artifacts saved to {}", bundle_path.display());

    Ok(PipelineArtifacts {
        history,
        best_loss,
        bundle_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::{PredictRequest, ServingEngine};
    use std::io::Write;

    type Inner = burn::backend::ndarray::NdArray<f32>;
    type TB = burn::backend::Autodiff<Inner>;

    fn tiny_config(csv_path: &Path) -> Config {
        let yaml = format!(
            "data:\n  csv_path: {}\n  window_size: 3\n\
             model:\n  embedding_dim: 4\n  hidden_size: 4\n  num_layers: 1\n  dropout: 0.0\n\
             training:\n  epochs: 2\n  batch_size: 4\n  patience: 5\n",
            csv_path.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn write_fixture_csv(dir: &Path) -> PathBuf {
        let path = dir.join("population.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Country name,Year,Population,Population (%)").unwrap();
        for (i, year) in (2000..=2004).enumerate() {
            writeln!(file, "A,{year},{},0.1", (i + 1) * 10).unwrap();
            writeln!(file, "B,{year},{},1.0", (i + 1) * 100).unwrap();
        }
        path
    }

    #[test]
    fn pipeline_trains_and_serving_round_trips() {
        <TB as burn::tensor::backend::Backend>::seed(42);
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_fixture_csv(dir.path());
        let config = tiny_config(&csv_path);
        let artifact_dir = dir.path().join("checkpoints");

        let artifacts =
            train_pipeline::<TB>(&config, &artifact_dir, Default::default()).unwrap();
        assert_eq!(artifacts.history.train_loss.len(), 2);
        assert!(artifacts.best_loss.is_finite());
        assert!(artifacts.bundle_path.exists());
        assert!(artifact_dir.join("deepar_best.mpk").exists());

        // the serving layer can reassemble everything from disk
        let engine =
            ServingEngine::<Inner>::load(&config, &artifact_dir, Default::default()).unwrap();
        let health = engine.health();
        assert!(health.model_loaded);
        assert_eq!(health.entities_available, 2);
        assert_eq!(engine.countries(), vec!["A".to_string(), "B".to_string()]);

        let response = engine
            .predict(&PredictRequest {
                country: "A".to_string(),
                target_year: 2026,
                num_samples: 16,
            })
            .unwrap();
        assert_eq!(response.forecasts.len(), 2026 - 2004);
        for f in &response.forecasts {
            assert!(f.lower <= f.median && f.median <= f.upper);
            assert!(f.mean >= 0.0);
        }

        let err = engine
            .predict(&PredictRequest {
                country: "Z".to_string(),
                target_year: 2026,
                num_samples: 16,
            })
            .unwrap_err();
        assert_eq!(err.status(), 404);

        // rerunning overwrites prior artifacts in place
        let rerun = train_pipeline::<TB>(&config, &artifact_dir, Default::default()).unwrap();
        assert!(rerun.bundle_path.exists());
    }
}
