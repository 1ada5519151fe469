//! The contract between the trained core and the HTTP layer.
//!
//! The HTTP veneer lives elsewhere; this module gives it everything it
//! needs: the artifact bundle written by the training pipeline, a
//! loader that reassembles the predictor from disk, typed request and
//! response schemas with the validation ranges of the public API, and
//! an error-to-status mapping. The engine is loaded once at startup
//! and is read-only afterwards; concurrent predictions share it
//! freely.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use burn::module::Module;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::data::{EntityCatalog, MeanScaler, Preprocessor, Series};
use crate::error::{Error, ForecastError, ServeError};
use crate::inference::{Forecast, Predictor};
use crate::model::DeepArConfig;
use crate::training::{CheckpointRecorder, TrainingHistory};

pub const MIN_TARGET_YEAR: i32 = 2024;
pub const MAX_TARGET_YEAR: i32 = 2100;
pub const MIN_SAMPLES: usize = 10;
pub const MAX_SAMPLES: usize = 1000;
pub const DEFAULT_SAMPLES: usize = 200;

/// Everything needed to re-instantiate the trained system, written as
/// one bincode blob next to the best-model checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub entity_to_index: BTreeMap<String, usize>,
    pub index_to_entity: Vec<String>,
    pub scaler_state: BTreeMap<String, f64>,
    pub num_entities: usize,
    pub config: Config,
    pub history: TrainingHistory,
}

impl ArtifactBundle {
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let file = BufWriter::new(File::create(path)?);
        Ok(bincode::serialize_into(file, self)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(file)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub country: String,
    pub target_year: i32,
    #[serde(default = "default_samples")]
    pub num_samples: usize,
}

fn default_samples() -> usize {
    DEFAULT_SAMPLES
}

impl PredictRequest {
    pub fn validate(&self) -> Result<(), ServeError> {
        if !(MIN_TARGET_YEAR..=MAX_TARGET_YEAR).contains(&self.target_year) {
            return Err(ServeError::InvalidRequest(format!(
                "target_year must be in [{MIN_TARGET_YEAR}, {MAX_TARGET_YEAR}], got {}",
                self.target_year
            )));
        }
        if !(MIN_SAMPLES..=MAX_SAMPLES).contains(&self.num_samples) {
            return Err(ServeError::InvalidRequest(format!(
                "num_samples must be in [{MIN_SAMPLES}, {MAX_SAMPLES}], got {}",
                self.num_samples
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub country: String,
    pub target_year: i32,
    pub forecasts: Vec<Forecast>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub model_loaded: bool,
    pub entities_available: usize,
}

/// The loaded model plus the historical data used for conditioning.
pub struct ServingEngine<B: Backend> {
    predictor: Predictor<B>,
    history: BTreeMap<String, Series>,
    window_size: usize,
}

impl<B: Backend> ServingEngine<B> {
    /// Reassemble the predictor from the artifact directory. Any
    /// missing or unreadable artifact maps to a 503 at the surface.
    pub fn load(config: &Config, artifact_dir: &Path, device: B::Device) -> Result<Self, ServeError> {
        let bundle = ArtifactBundle::load(&artifact_dir.join("artifacts.bin"))
            .map_err(|e| ServeError::NotLoaded(e.to_string()))?;

        let mut scaler = MeanScaler::new();
        scaler.load_state_dict(bundle.scaler_state.clone());
        let catalog = EntityCatalog::from_names(bundle.index_to_entity.iter().cloned());

        let model = DeepArConfig::new(bundle.num_entities)
            .with_embedding_dim(bundle.config.model.embedding_dim)
            .with_hidden_size(bundle.config.model.hidden_size)
            .with_num_layers(bundle.config.model.num_layers)
            // dropout is inert at inference
            .with_dropout(0.0)
            .init::<B>(&device);
        let model = model
            .load_file(artifact_dir.join("deepar_best"), &CheckpointRecorder::new())
            .map_err(|e| ServeError::NotLoaded(e.to_string()))?;

        let predictor = Predictor::new(
            model,
            scaler,
            catalog,
            device,
            bundle.config.inference.num_samples,
        );

        let prep = Preprocessor::new(&config.data.csv_path, &config.data.non_countries)
            .load()
            .map_err(|e| ServeError::NotLoaded(e.to_string()))?;

        log::info!(
            "model loaded; {} countries ready for inference",
            predictor.catalog().len()
        );

        Ok(Self {
            predictor,
            history: prep.series,
            window_size: config.data.window_size,
        })
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            model_loaded: true,
            entities_available: self.predictor.catalog().len(),
        }
    }

    /// The catalog captured at training time, sorted.
    pub fn countries(&self) -> Vec<String> {
        self.predictor.catalog().names().to_vec()
    }

    /// Translate a request into a predictor call, conditioning on the
    /// last `window_size` known observations of the entity.
    pub fn predict(&self, request: &PredictRequest) -> Result<PredictResponse, ServeError> {
        request.validate()?;

        let series = self
            .history
            .get(&request.country)
            .ok_or_else(|| ServeError::UnknownCountry(request.country.clone()))?;

        let start = series.values.len().saturating_sub(self.window_size);
        let forecasts = self
            .predictor
            .predict(
                &request.country,
                &series.values[start..],
                &series.years[start..],
                request.target_year,
                Some(request.num_samples),
            )
            .map_err(|e| match e {
                ForecastError::UnknownEntity(name) => ServeError::UnknownCountry(name),
                other => ServeError::Internal(other.to_string()),
            })?;

        Ok(PredictResponse {
            country: request.country.clone(),
            target_year: request.target_year,
            forecasts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target_year: i32, num_samples: usize) -> PredictRequest {
        PredictRequest {
            country: "Vietnam".to_string(),
            target_year,
            num_samples,
        }
    }

    #[test]
    fn request_bounds_are_enforced() {
        assert!(request(2030, 200).validate().is_ok());
        assert!(request(2024, 10).validate().is_ok());
        assert!(request(2100, 1000).validate().is_ok());

        for bad in [request(2023, 200), request(2101, 200), request(2030, 5), request(2030, 5000)]
        {
            let err = bad.validate().unwrap_err();
            assert_eq!(err.status(), 422);
        }
    }

    #[test]
    fn num_samples_defaults_to_200() {
        let parsed: PredictRequest =
            serde_json::from_str(r#"{"country": "Vietnam", "target_year": 2030}"#).unwrap();
        assert_eq!(parsed.num_samples, DEFAULT_SAMPLES);
    }

    #[test]
    fn error_statuses_match_the_contract() {
        assert_eq!(ServeError::NotLoaded("x".into()).status(), 503);
        assert_eq!(ServeError::UnknownCountry("x".into()).status(), 404);
        assert_eq!(ServeError::Internal("x".into()).status(), 500);
    }

    #[test]
    fn bundle_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.bin");

        let mut scales = BTreeMap::new();
        scales.insert("Vietnam".to_string(), 7.5e7);
        let bundle = ArtifactBundle {
            entity_to_index: [("Vietnam".to_string(), 0)].into_iter().collect(),
            index_to_entity: vec!["Vietnam".to_string()],
            scaler_state: scales,
            num_entities: 1,
            config: serde_yaml::from_str(
                "data:\n  csv_path: pop.csv\n  window_size: 10\n",
            )
            .unwrap(),
            history: TrainingHistory::default(),
        };
        bundle.save(&path).unwrap();

        let restored = ArtifactBundle::load(&path).unwrap();
        assert_eq!(restored.num_entities, 1);
        assert_eq!(restored.index_to_entity, bundle.index_to_entity);
        assert_eq!(restored.scaler_state, bundle.scaler_state);
    }
}
