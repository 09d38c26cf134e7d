use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::backend::wgpu::WgpuDevice;
use burn::config::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lab_colourize::cifar::Cifar10;
use lab_colourize::infer::{colourize_image, load_model};
use lab_colourize::train::{train_classification, train_colourization};
use lab_colourize::ExperimentConfig;

type Backend = burn::backend::Autodiff<burn::backend::Wgpu>;

#[derive(Parser, Debug)]
#[command(name = "lab-colourize", version, about = "Lab-space colourization on CIFAR-10")]
struct Args {
    /// JSON experiment configuration; defaults are used when omitted.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the CIFAR-10 binary batch directory.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the UNet to predict chroma from luminance.
    Colourize,
    /// Train the classification arm on a single Lab channel.
    Classify,
    /// Colourize an image file with a trained model.
    Infer {
        input: PathBuf,
        output: PathBuf,
        /// Checkpoint to load, defaults to `<model_dir>/<experiment>/model`.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lab_colourize={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn load_config(args: &Args) -> Result<ExperimentConfig> {
    let mut config = match (&args.config, &args.command) {
        (Some(path), _) => ExperimentConfig::load(path).map_err(|err| {
            anyhow::anyhow!("failed to load config {}: {err:?}", path.display())
        })?,
        (None, Command::Classify) => ExperimentConfig::classification(),
        (None, _) => ExperimentConfig::new(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let device = WgpuDevice::default();
    tracing::info!(?device, experiment = %config.experiment, "starting");

    match args.command {
        Command::Colourize => {
            let dataset = Cifar10::load_dir(&config.data_dir).context("failed to load CIFAR-10")?;
            train_colourization::<Backend>(&config, &dataset, device)?;
        }
        Command::Classify => {
            let dataset = Cifar10::load_dir(&config.data_dir).context("failed to load CIFAR-10")?;
            train_classification::<Backend>(&config, &dataset, device)?;
        }
        Command::Infer {
            input,
            output,
            checkpoint,
        } => {
            let checkpoint = checkpoint.unwrap_or_else(|| config.model_path().join("model"));
            let model = load_model::<burn::backend::Wgpu>(&config.model, &checkpoint, &device)?;
            colourize_image(&model, &config.model, &input, &output, &device)?;
        }
    }

    Ok(())
}
