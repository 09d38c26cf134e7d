use burn::{config::Config, optim::AdamConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cifar::Category;
use crate::error::Error;
use crate::model::UNetConfig;

/// Lab channel kept by the classification preprocessor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabChannel {
    L,
    A,
    B,
}

impl LabChannel {
    pub fn index(self) -> usize {
        match self {
            LabChannel::L => 0,
            LabChannel::A => 1,
            LabChannel::B => 2,
        }
    }
}

#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Raw pixels are divided by this value before colour conversion.
    #[config(default = 256.0)]
    pub max_pixel: f32,

    /// Categories kept for colourization, in concatenation order.
    #[config(default = "vec![Category::Bird, Category::Horse, Category::Cat, Category::Deer]")]
    pub categories: Vec<Category>,

    #[config(default = "LabChannel::A")]
    pub classification_channel: LabChannel,
}

#[derive(Config)]
pub struct ExperimentConfig {
    #[config(default = "String::from(\"Unet_256_animals\")")]
    pub experiment: String,

    /// Directory holding the CIFAR-10 binary batches.
    #[config(default = "String::from(\"./data/cifar-10-batches-bin\")")]
    pub data_dir: String,

    #[config(default = "String::from(\"./models\")")]
    pub model_dir: String,

    #[config(default = "String::from(\"./outputs\")")]
    pub output_dir: String,

    #[config(default = 50)]
    pub num_epochs: usize,

    #[config(default = 100)]
    pub batch_size: usize,

    #[config(default = 1.0e-3)]
    pub learning_rate: f64,

    #[config(default = 0)]
    pub seed: u64,

    #[config(default = true)]
    pub plot_images: bool,

    #[config(default = true)]
    pub save_model: bool,

    #[config(default = 5)]
    pub checkpoint_every: usize,

    /// Nearest-neighbour upscale applied to diagnostic plots.
    #[config(default = 4)]
    pub plot_scale: u32,

    /// Optional JSON colour category table.
    pub colour_table: Option<String>,

    #[config(default = "PreprocessConfig::new()")]
    pub preprocess: PreprocessConfig,

    #[config(default = "UNetConfig::new()")]
    pub model: UNetConfig,

    #[config(default = "AdamConfig::new()")]
    pub optimizer: AdamConfig,
}

impl ExperimentConfig {
    /// Defaults for the classification pre-training run.
    pub fn classification() -> Self {
        Self::new()
            .with_experiment("Unet_custom_class".to_string())
            .with_learning_rate(2.0e-4)
            .with_optimizer(AdamConfig::new().with_beta_1(0.5).with_beta_2(0.999))
    }

    /// `<model_dir>/<experiment>`
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.model_dir).join(&self.experiment)
    }

    /// `<output_dir>/<experiment>`
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir).join(&self.experiment)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be positive"));
        }
        if self.checkpoint_every == 0 {
            return Err(Error::invalid("checkpoint_every", "must be positive"));
        }
        if self.plot_scale == 0 {
            return Err(Error::invalid("plot_scale", "must be positive"));
        }
        if self.preprocess.categories.is_empty() {
            return Err(Error::invalid("categories", "at least one category is required"));
        }
        if self.preprocess.max_pixel <= 0.0 {
            return Err(Error::invalid("max_pixel", "must be positive"));
        }
        Ok(())
    }
}
