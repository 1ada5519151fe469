//! Error taxonomy.
//!
//! Configuration and data errors are fatal at process start or
//! preprocess time; shape/contract errors carry the offending
//! identifier and surface to the caller unchanged. The serving layer
//! maps [`ServeError`] variants onto HTTP status codes.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read data file: {0}")]
    Read(#[from] csv::Error),
    #[error("expected at least {expected} columns, found {found}")]
    Schema { expected: usize, found: usize },
    #[error("row {row}: could not parse {column} value {value:?}")]
    BadField {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("no observations left after filtering")]
    Empty,
    #[error("duplicate year {year} for entity {entity:?}")]
    DuplicateYear { entity: String, year: i32 },
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("unknown entity {0:?}")]
    UnknownEntity(String),
    #[error("history for {entity:?} has {got} observations, need at least {need}")]
    ShortHistory {
        entity: String,
        got: usize,
        need: usize,
    },
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("failed to persist checkpoint: {0}")]
    Checkpoint(#[from] burn::record::RecorderError),
    #[error("checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint metadata: {0}")]
    Meta(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("model artifacts not loaded: {0}")]
    NotLoaded(String),
    #[error("country {0:?} not found")]
    UnknownCountry(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("prediction failed: {0}")]
    Internal(String),
}

impl ServeError {
    /// HTTP status the adapter should answer with.
    pub fn status(&self) -> u16 {
        match self {
            ServeError::NotLoaded(_) => 503,
            ServeError::UnknownCountry(_) => 404,
            ServeError::InvalidRequest(_) => 422,
            ServeError::Internal(_) => 500,
        }
    }
}

/// Crate-level umbrella for the binaries and the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact serialization: {0}")]
    Artifact(#[from] bincode::Error),
}
