//! Colourization and classification of CIFAR-10 in Lab colour space.
//!
//! Raw RGB batches are filtered by category, shuffled, converted to Lab and
//! split into a luminance input and a chroma target for a UNet. Predictions
//! are turned back into RGB grids for inspection.

pub mod batcher;
pub mod cifar;
pub mod colour;
pub mod config;
pub mod data;
pub mod error;
pub mod infer;
pub mod model;
pub mod plot;
pub mod train;

pub use config::{ExperimentConfig, LabChannel, PreprocessConfig};
pub use error::{Error, Result};
