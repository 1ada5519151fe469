//! Train the proposed model against both baselines under the fixed
//! temporal split and report point-forecast metrics.

use std::path::PathBuf;

use chrono::{Datelike, Timelike};
use clap::Parser;

use popcast::config::Config;
use popcast::experiment::{run_experiments, DESIGNATED_ENTITY};

#[derive(Parser)]
#[command(about = "Compare the forecasting model against its baselines")]
struct Args {
    /// YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
    /// Parent directory for experiment artifacts.
    #[arg(short, long, default_value = "checkpoints/experiments")]
    artifacts: PathBuf,
    /// Entity for the single-series comparison.
    #[arg(short, long, default_value = DESIGNATED_ENTITY)]
    entity: String,
}

#[cfg(feature = "gpu")]
type Inner = burn::backend::wgpu::Wgpu<burn::backend::wgpu::AutoGraphicsApi, f32, i32>;
#[cfg(not(feature = "gpu"))]
type Inner = burn::backend::ndarray::NdArray<f32>;
type Train = burn::backend::Autodiff<Inner>;

fn main() {
    let args = Args::parse();

    let now = chrono::Local::now();
    let run_dir = args.artifacts.join(format!(
        "{}-{:0>2}-{:0>2}={:0>2}-{:0>2}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute()
    ));
    std::fs::create_dir_all(&run_dir).expect("artifact directory should be creatable");
    popcast::init_logging(Some(&run_dir.join("experiment.log")));

    let config = match Config::from_yaml(&args.config) {
        Ok(config) => config,
        Err(error) => {
            log::error!("{error}");
            std::process::exit(1);
        }
    };

    let device = <Train as burn::tensor::backend::Backend>::Device::default();
    if let Err(error) = run_experiments::<Train>(&config, &run_dir, device, &args.entity) {
        log::error!("experiment failed: {error}");
        std::process::exit(1);
    }
}
