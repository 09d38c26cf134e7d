use burn::{
    config::Config,
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use burn_tensor::ElementConversion;
use ndarray::{Array4, ArrayView1, ArrayView4, Axis};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::batcher::{
    BatchIter, ClassificationBatcher, ClassificationItem, ColourizationBatcher, ColourizationItem,
};
use crate::cifar::Cifar10;
use crate::colour::ColourTable;
use crate::config::ExperimentConfig;
use crate::data::{process_classification, process_lab};
use crate::error::{Error, Result};
use crate::model::{correct_predictions, UNet};
use crate::plot::plot_lab;

/// Per-epoch losses written next to the plots as `training_curve.json`.
#[derive(Debug, Default, Serialize)]
pub struct LossHistory {
    pub train: Vec<f32>,
    pub valid: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub valid_accuracy: Vec<f32>,
}

impl LossHistory {
    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub(crate) fn tensor_to_array<B: Backend>(tensor: Tensor<B, 4>) -> Result<Array4<f32>> {
    let [n, c, h, w] = tensor.dims();
    let values = tensor.into_data().convert::<f32>().value;
    Array4::from_shape_vec((n, c, h, w), values)
        .map_err(|err| Error::shape_mismatch(format!("[{n}, {c}, {h}, {w}]"), err))
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

fn ensure_samples(split: &str, count: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::invalid(split, "no samples to process"));
    }
    Ok(())
}

fn save_model<B: Backend>(model: &UNet<B>, path: PathBuf) -> Result<()> {
    tracing::info!("Saving model to {}", path.display());
    model
        .clone()
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|err| Error::Recorder {
            path,
            reason: format!("{err:?}"),
        })
}

fn prepare_dirs(config: &ExperimentConfig) -> Result<(PathBuf, PathBuf)> {
    config.validate()?;
    let model_dir = config.model_path();
    let output_dir = config.output_path();
    fs::create_dir_all(&model_dir)?;
    fs::create_dir_all(&output_dir)?;
    config.save(model_dir.join("config.json"))?;
    Ok((model_dir, output_dir))
}

/// Average validation loss over all test batches.
///
/// When `plot` is set, the last batch is drawn to that path. Empty input is
/// rejected rather than averaged to NaN.
pub fn run_validation_step<'a, B: Backend>(
    model: &UNet<B>,
    batcher: &ColourizationBatcher<B>,
    luminance: ArrayView4<'a, f32>,
    chroma: ArrayView4<'a, f32>,
    batch_size: usize,
    plot: Option<(&Path, u32)>,
) -> Result<f32> {
    ensure_samples("validation", luminance.len_of(Axis(0)))?;
    let mut losses = Vec::new();
    let mut last = None;

    for (xs, ys) in BatchIter::new(luminance, chroma, batch_size)? {
        let batch = batcher.batch(ColourizationItem::from_views(xs, ys));
        let output = model.forward_colourization(batch);
        losses.push(output.loss.into_scalar().elem::<f32>());
        last = Some((xs, ys, output.output));
    }

    if let (Some((path, scale)), Some((xs, ys, output))) = (plot, last) {
        let predicted = tensor_to_array(output)?;
        plot_lab(xs, ys, predicted.view(), path, scale)?;
    }

    Ok(mean(&losses))
}

/// Train the UNet to predict chroma from luminance.
pub fn train_colourization<B: AutodiffBackend>(
    config: &ExperimentConfig,
    dataset: &Cifar10,
    device: B::Device,
) -> Result<UNet<B>> {
    let (model_dir, output_dir) = prepare_dirs(config)?;
    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    if let Some(path) = &config.colour_table {
        let colours = ColourTable::load(path)?;
        tracing::info!(clusters = colours.len(), "loaded colour categories from {path}");
    }

    tracing::info!("Transforming data...");
    let (train_l, train_ab) = process_lab(
        dataset.train.images.view(),
        dataset.train.labels.view(),
        &config.preprocess,
        &mut rng,
    )?;
    let (test_l, test_ab) = process_lab(
        dataset.test.images.view(),
        dataset.test.labels.view(),
        &config.preprocess,
        &mut rng,
    )?;
    ensure_samples("train", train_l.len_of(Axis(0)))?;
    ensure_samples("test", test_l.len_of(Axis(0)))?;

    let batcher_train = ColourizationBatcher::<B>::new(device.clone());
    let batcher_valid = ColourizationBatcher::<B::InnerBackend>::new(device.clone());

    let mut model = config.model.init::<B>(&device);
    let mut optim = config.optimizer.init::<B, UNet<B>>();
    let mut history = LossHistory::default();

    tracing::info!("Beginning training ...");
    let start = Instant::now();

    for epoch in 0..config.num_epochs {
        let mut losses = Vec::new();
        let mut last = None;

        for (xs, ys) in BatchIter::new(train_l.view(), train_ab.view(), config.batch_size)? {
            let batch = batcher_train.batch(ColourizationItem::from_views(xs, ys));
            let output = model.forward_colourization(batch);
            losses.push(output.loss.clone().into_scalar().elem::<f32>());

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);

            if config.plot_images {
                last = Some((xs, ys, output.output));
            }
        }

        if let Some((xs, ys, output)) = last {
            let predicted = tensor_to_array(output.inner())?;
            plot_lab(
                xs,
                ys,
                predicted.view(),
                output_dir.join(format!("train_{epoch}.png")),
                config.plot_scale,
            )?;
        }

        let avg_loss = mean(&losses);
        history.train.push(avg_loss);
        tracing::info!(
            "Epoch [{}/{}], Loss: {:.4}, Time (s): {}",
            epoch + 1,
            config.num_epochs,
            avg_loss,
            start.elapsed().as_secs()
        );

        let plot_path = output_dir.join(format!("test_{epoch}.png"));
        let plot = config.plot_images.then_some((plot_path.as_path(), config.plot_scale));
        let val_loss = run_validation_step(
            &model.valid(),
            &batcher_valid,
            test_l.view(),
            test_ab.view(),
            config.batch_size,
            plot,
        )?;
        history.valid.push(val_loss);
        tracing::info!(
            "Epoch [{}/{}], Val Loss: {:.4}, Time(s): {}",
            epoch + 1,
            config.num_epochs,
            val_loss,
            start.elapsed().as_secs()
        );

        if config.save_model && epoch % config.checkpoint_every == 0 {
            save_model(&model, model_dir.join(format!("model{epoch}")))?;
        }
    }

    history.save(&output_dir.join("training_curve.json"))?;
    if config.save_model {
        save_model(&model, model_dir.join("model"))?;
    }

    Ok(model)
}

/// Validation loss and accuracy (percent) of the classification head.
pub fn run_classification_validation<'a, B: Backend>(
    model: &UNet<B>,
    batcher: &ClassificationBatcher<B>,
    images: ArrayView4<'a, f32>,
    labels: ArrayView1<'a, u8>,
    batch_size: usize,
) -> Result<(f32, f32)> {
    ensure_samples("validation", labels.len())?;
    let mut losses = Vec::new();
    let mut correct = 0usize;

    for (xs, ys) in BatchIter::new(images, labels, batch_size)? {
        let batch = batcher.batch(ClassificationItem::from_views(xs, ys));
        let output = model.forward_classification_loss(batch);
        correct += correct_predictions(&output);
        losses.push(output.loss.into_scalar().elem::<f32>());
    }

    let accuracy = 100.0 * correct as f32 / labels.len() as f32;
    Ok((mean(&losses), accuracy))
}

/// Train the classification arm of the UNet on a single Lab channel.
pub fn train_classification<B: AutodiffBackend>(
    config: &ExperimentConfig,
    dataset: &Cifar10,
    device: B::Device,
) -> Result<UNet<B>> {
    let (model_dir, output_dir) = prepare_dirs(config)?;
    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let preprocess = &config.preprocess;

    tracing::info!("Transforming data...");
    let (x_train, y_train) = process_classification(
        dataset.train.images.view(),
        dataset.train.labels.view(),
        preprocess.max_pixel,
        preprocess.classification_channel,
        &mut rng,
    )?;
    let (x_test, y_test) = process_classification(
        dataset.test.images.view(),
        dataset.test.labels.view(),
        preprocess.max_pixel,
        preprocess.classification_channel,
        &mut rng,
    )?;
    ensure_samples("train", y_train.len())?;
    ensure_samples("test", y_test.len())?;

    let batcher_train = ClassificationBatcher::<B>::new(device.clone());
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::new(device.clone());

    let mut model = config.model.init::<B>(&device);
    let mut optim = config.optimizer.init::<B, UNet<B>>();
    let mut history = LossHistory::default();

    tracing::info!("Beginning training ...");
    let start = Instant::now();

    for epoch in 0..config.num_epochs {
        let mut losses = Vec::new();

        for (xs, ys) in BatchIter::new(x_train.view(), y_train.view(), config.batch_size)? {
            let batch = batcher_train.batch(ClassificationItem::from_views(xs, ys));
            let output = model.forward_classification_loss(batch);
            losses.push(output.loss.clone().into_scalar().elem::<f32>());

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let avg_loss = mean(&losses);
        history.train.push(avg_loss);
        tracing::info!(
            "Epoch [{}/{}], Loss: {:.4}, Time (s): {}",
            epoch + 1,
            config.num_epochs,
            avg_loss,
            start.elapsed().as_secs()
        );

        let (val_loss, val_acc) = run_classification_validation(
            &model.valid(),
            &batcher_valid,
            x_test.view(),
            y_test.view(),
            config.batch_size,
        )?;
        history.valid.push(val_loss);
        history.valid_accuracy.push(val_acc);
        tracing::info!(
            "Epoch [{}/{}], Val Loss: {:.4}, Val Acc: {:.1}%, Time(s): {}",
            epoch + 1,
            config.num_epochs,
            val_loss,
            val_acc,
            start.elapsed().as_secs()
        );

        if config.save_model && epoch % config.checkpoint_every == 0 {
            save_model(&model, model_dir.join(format!("model{epoch}")))?;
        }
    }

    history.save(&output_dir.join("training_curve.json"))?;
    if config.save_model {
        save_model(&model, model_dir.join("model"))?;
    }

    Ok(model)
}
