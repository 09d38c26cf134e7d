//! Dataset preprocessing: category selection, shuffling and Lab conversion.

use ndarray::{s, Array1, Array4, ArrayView1, ArrayView4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::cifar::Category;
use crate::colour::{map_batch, rgb_to_lab};
use crate::config::{LabChannel, PreprocessConfig};
use crate::error::{Error, Result};

/// Luminance range of Lab `L`.
pub const L_SCALE: f32 = 100.0;
/// Offset and range used to bring Lab `a`/`b` into `[0, 1]`.
pub const AB_OFFSET: f32 = 128.0;
pub const AB_SCALE: f32 = 256.0;

fn check_aligned(samples: usize, labels: usize) -> Result<()> {
    if samples != labels {
        return Err(Error::shape_mismatch(
            format!("{samples} labels for {samples} images"),
            format!("{labels} labels"),
        ));
    }
    Ok(())
}

/// Sample indices whose label matches `categories`, grouped in category order.
pub fn select_categories(labels: ArrayView1<u8>, categories: &[Category]) -> Result<Vec<usize>> {
    if categories.is_empty() {
        return Err(Error::invalid("categories", "at least one category is required"));
    }

    let mut indices = Vec::new();
    for category in categories {
        let id = category.id();
        let before = indices.len();
        indices.extend(
            labels
                .iter()
                .enumerate()
                .filter(|&(_, &label)| label == id)
                .map(|(i, _)| i),
        );
        tracing::debug!(?category, count = indices.len() - before, "selected samples");
    }
    Ok(indices)
}

/// Keep only samples of the given categories and shuffle them once.
///
/// Labels are not returned: colourization has no use for them.
pub fn filter_and_shuffle<R: Rng>(
    images: ArrayView4<f32>,
    labels: ArrayView1<u8>,
    categories: &[Category],
    rng: &mut R,
) -> Result<Array4<f32>> {
    check_aligned(images.len_of(Axis(0)), labels.len())?;

    let mut indices = select_categories(labels, categories)?;
    indices.shuffle(rng);
    Ok(images.select(Axis(0), &indices))
}

/// Convert a `(N, 3, H, W)` batch of RGB values in `[0, 1]` to Lab.
pub fn rgb_to_lab_batch(images: ArrayView4<f32>) -> Result<Array4<f32>> {
    map_batch(images, rgb_to_lab)
}

/// Lab conversion of raw pixels, dividing by `max_pixel` on the fly.
fn scaled_rgb_to_lab(images: ArrayView4<f32>, max_pixel: f32) -> Result<Array4<f32>> {
    map_batch(images, |[r, g, b]| rgb_to_lab([r / max_pixel, g / max_pixel, b / max_pixel]))
}

/// Split a Lab batch into normalized luminance `(N, 1, H, W)` and chroma `(N, 2, H, W)`.
pub fn split_lab(lab: ArrayView4<f32>) -> (Array4<f32>, Array4<f32>) {
    let luminance = lab.slice(s![.., 0..1, .., ..]).mapv(|l| l / L_SCALE);
    let chroma = lab
        .slice(s![.., 1..3, .., ..])
        .mapv(|ab| (ab + AB_OFFSET) / AB_SCALE);
    (luminance, chroma)
}

/// Preprocess a raw CIFAR split for colourization.
///
/// Returns `(luminance, chroma)`, both sample aligned.
pub fn process_lab<R: Rng>(
    images: ArrayView4<f32>,
    labels: ArrayView1<u8>,
    config: &PreprocessConfig,
    rng: &mut R,
) -> Result<(Array4<f32>, Array4<f32>)> {
    let selected = filter_and_shuffle(images, labels, &config.categories, rng)?;
    tracing::info!(shape = ?selected.shape(), "filtered colourization samples");

    let lab = scaled_rgb_to_lab(selected.view(), config.max_pixel)?;
    Ok(split_lab(lab.view()))
}

/// Preprocess a raw CIFAR split for classification.
///
/// Keeps the raw Lab values of `channel` as a single-channel image and
/// shuffles images and labels with one permutation.
pub fn process_classification<R: Rng>(
    images: ArrayView4<f32>,
    labels: ArrayView1<u8>,
    max_pixel: f32,
    channel: LabChannel,
    rng: &mut R,
) -> Result<(Array4<f32>, Array1<u8>)> {
    check_aligned(images.len_of(Axis(0)), labels.len())?;

    let lab = scaled_rgb_to_lab(images, max_pixel)?;
    let index = channel.index();
    let single = lab.slice(s![.., index..index + 1, .., ..]);

    let mut permutation: Vec<usize> = (0..labels.len()).collect();
    permutation.shuffle(rng);

    let images = single.select(Axis(0), &permutation);
    let labels = labels.select(Axis(0), &permutation);
    tracing::info!(shape = ?images.shape(), ?channel, "prepared classification samples");
    Ok((images, labels))
}
