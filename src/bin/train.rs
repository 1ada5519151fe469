//! Train the production forecasting model and persist its artifacts.

use std::path::PathBuf;

use clap::Parser;

use popcast::config::Config;
use popcast::pipeline::train_pipeline;

#[derive(Parser)]
#[command(about = "Train the population forecasting model")]
struct Args {
    /// YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
    /// Directory for checkpoints and artifacts.
    #[arg(short, long, default_value = "checkpoints")]
    artifacts: PathBuf,
}

#[cfg(feature = "gpu")]
type Inner = burn::backend::wgpu::Wgpu<burn::backend::wgpu::AutoGraphicsApi, f32, i32>;
#[cfg(not(feature = "gpu"))]
type Inner = burn::backend::ndarray::NdArray<f32>;
type Train = burn::backend::Autodiff<Inner>;

fn main() {
    let args = Args::parse();

    std::fs::create_dir_all(&args.artifacts).expect("artifact directory should be creatable");
    popcast::init_logging(Some(&args.artifacts.join("train.log")));

    let config = match Config::from_yaml(&args.config) {
        Ok(config) => config,
        Err(error) => {
            log::error!("{error}");
            std::process::exit(1);
        }
    };

    let device = <Train as burn::tensor::backend::Backend>::Device::default();
    if let Err(error) = train_pipeline::<Train>(&config, &args.artifacts, device) {
        log::error!("training failed: {error}");
        std::process::exit(1);
    }
}
