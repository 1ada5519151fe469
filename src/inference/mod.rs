//! Probabilistic inference.

pub mod predictor;

pub use predictor::{Forecast, Predictor};
