//! Probabilistic population forecasting.
//!
//! The crate trains an autoregressive recurrent network with a Gaussian
//! likelihood head over many related population series, then serves
//! Monte-Carlo forecasts from the trained artifacts. The main pieces:
//!
//! - [`data`]: CSV ingestion, per-entity mean scaling, sliding-window
//!   sample generation.
//! - [`model`]: the forecast network (entity embedding, year covariate
//!   projection, stacked recurrent backbone, Gaussian head).
//! - [`training`]: epoch loop with gradient clipping, plateau LR
//!   scheduling, early stopping and best-checkpoint persistence.
//! - [`inference`]: two-phase conditioning + sampling predictor.
//! - [`pipeline`] / [`experiment`]: production training run and the
//!   baseline comparison harness.
//! - [`serve`]: the artifact bundle and request/response contract used
//!   by the HTTP layer.

use std::path::Path;

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod serve;
pub mod training;

pub use config::Config;
pub use error::Error;

/// First year of observations in the source data. Also the origin of
/// the normalised year covariate.
pub const FIRST_YEAR: i32 = 1950;

/// Last year of observations in the source data.
pub const LAST_YEAR: i32 = 2023;

/// Route log records to stdout and, optionally, a file inside the
/// artifact directory.
///
/// Called once at process start by the binaries; failure to set up
/// logging is fatal.
pub fn init_logging(log_file: Option<&Path>) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<5} | {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path).expect("log file should be creatable"));
    }

    dispatch
        .apply()
        .expect("logger should have initialized correctly");
}
