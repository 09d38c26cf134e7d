//! Reconstruct RGB images from normalized Lab tensors and tile diagnostic grids.

use image::{imageops::FilterType, ImageBuffer, Rgb, RgbImage};
use ndarray::{concatenate, s, Array3, Array4, ArrayView3, ArrayView4, Axis};
use std::path::Path;

use crate::colour::{lab_to_rgb, map_batch};
use crate::data::{AB_OFFSET, AB_SCALE, L_SCALE};
use crate::error::{Error, Result};

/// Samples shown per row of a diagnostic plot.
pub const PLOT_SAMPLES: usize = 10;

/// Undo luminance/chroma normalization and rebuild a `(N, 3, H, W)` Lab batch.
pub fn denormalize_lab(luminance: ArrayView4<f32>, chroma: ArrayView4<f32>) -> Result<Array4<f32>> {
    let (n, lc, h, w) = luminance.dim();
    if lc != 1 || chroma.dim() != (n, 2, h, w) {
        return Err(Error::shape_mismatch(
            format!("luminance [N, 1, H, W] with chroma [{n}, 2, {h}, {w}]"),
            format!("{:?} and {:?}", luminance.shape(), chroma.shape()),
        ));
    }

    let l = luminance.mapv(|v| v * L_SCALE);
    let ab = chroma.mapv(|v| v * AB_SCALE - AB_OFFSET);
    concatenate(Axis(1), &[l.view(), ab.view()])
        .map_err(|err| Error::shape_mismatch("concatenable Lab channels", err))
}

/// Lab batch to RGB in `[0, 1]`.
pub fn lab_to_rgb_batch(lab: ArrayView4<f32>) -> Result<Array4<f32>> {
    map_batch(lab, lab_to_rgb)
}

/// Normalized luminance and chroma back to displayable RGB.
pub fn reconstruct_rgb(luminance: ArrayView4<f32>, chroma: ArrayView4<f32>) -> Result<Array4<f32>> {
    let lab = denormalize_lab(luminance, chroma)?;
    lab_to_rgb_batch(lab.view())
}

/// Lay `(N, 3, H, W)` images side by side as one `(3, H, N * W)` row.
fn hstack(images: ArrayView4<f32>) -> Result<Array3<f32>> {
    let parts: Vec<ArrayView3<f32>> = images.outer_iter().collect();
    concatenate(Axis(2), &parts).map_err(|err| Error::shape_mismatch("equal image sizes", err))
}

/// Stack luminance, ground truth and prediction rows into one `(3, 3H, kW)` grid.
pub fn assemble_grid(
    input: ArrayView4<f32>,
    ground_truth: ArrayView4<f32>,
    predicted: ArrayView4<f32>,
) -> Result<Array3<f32>> {
    let n = input.len_of(Axis(0));
    if ground_truth.len_of(Axis(0)) != n || predicted.len_of(Axis(0)) != n {
        return Err(Error::shape_mismatch(
            format!("{n} samples in every plot row"),
            format!(
                "{} ground truth and {} predicted",
                ground_truth.len_of(Axis(0)),
                predicted.len_of(Axis(0))
            ),
        ));
    }
    if n == 0 {
        return Err(Error::invalid("input", "nothing to plot"));
    }
    let k = n.min(PLOT_SAMPLES);
    let input = input.slice(s![..k, .., .., ..]);
    let ground_truth = ground_truth.slice(s![..k, .., .., ..]);
    let predicted = predicted.slice(s![..k, .., .., ..]);

    let grey = input.broadcast((k, 3, input.dim().2, input.dim().3)).ok_or_else(|| {
        Error::shape_mismatch("single-channel luminance", format!("{:?}", input.shape()))
    })?;
    let gt_rgb = reconstruct_rgb(input, ground_truth)?;
    let pred_rgb = reconstruct_rgb(input, predicted)?;

    let rows = [hstack(grey)?, hstack(gt_rgb.view())?, hstack(pred_rgb.view())?];
    let views: Vec<ArrayView3<f32>> = rows.iter().map(|r| r.view()).collect();
    concatenate(Axis(1), &views).map_err(|err| Error::shape_mismatch("equal row widths", err))
}

/// `(3, H, W)` values in `[0, 1]` to an 8-bit RGB image.
pub fn to_image(grid: ArrayView3<f32>) -> RgbImage {
    let (_, height, width) = grid.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let px = |c: usize| (grid[[c, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([px(0), px(1), px(2)])
    })
}

/// Save a grey input / ground truth / prediction grid for the first ten samples.
pub fn plot_lab<P: AsRef<Path>>(
    input: ArrayView4<f32>,
    ground_truth: ArrayView4<f32>,
    predicted: ArrayView4<f32>,
    path: P,
    scale: u32,
) -> Result<()> {
    let path = path.as_ref();
    let grid = assemble_grid(input, ground_truth, predicted)?;
    let mut img = to_image(grid.view());
    if scale > 1 {
        img = image::imageops::resize(
            &img,
            img.width() * scale,
            img.height() * scale,
            FilterType::Nearest,
        );
    }

    img.save(path).map_err(|source| Error::ImageSave {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("saved plot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::{rgb_to_lab_batch, split_lab};
    use ndarray::Array;

    fn synthetic_rgb(n: usize) -> Array4<f32> {
        Array::from_shape_fn((n, 3, 4, 4), |(i, c, y, x)| {
            0.05 + 0.9 * (((i + 1) * (c + 2) + y * 3 + x) % 17) as f32 / 17.0
        })
    }

    #[test]
    fn normalized_lab_round_trips_to_rgb() {
        let rgb = synthetic_rgb(3);
        let lab = rgb_to_lab_batch(rgb.view()).unwrap();
        let (luminance, chroma) = split_lab(lab.view());

        let back = reconstruct_rgb(luminance.view(), chroma.view()).unwrap();
        assert_eq!(back.shape(), rgb.shape());
        for (a, b) in back.iter().zip(rgb.iter()) {
            assert!((a - b).abs() < 2e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn denormalize_restores_lab_ranges() {
        let luminance = Array4::<f32>::from_elem((1, 1, 1, 1), 0.5);
        let chroma = Array4::<f32>::from_elem((1, 2, 1, 1), 0.25);
        let lab = denormalize_lab(luminance.view(), chroma.view()).unwrap();
        assert_eq!(lab[[0, 0, 0, 0]], 50.0);
        assert_eq!(lab[[0, 1, 0, 0]], -64.0);
        assert_eq!(lab[[0, 2, 0, 0]], -64.0);
    }

    #[test]
    fn denormalize_rejects_mismatched_pairs() {
        let luminance = Array4::<f32>::zeros((2, 1, 4, 4));
        let chroma = Array4::<f32>::zeros((3, 2, 4, 4));
        assert!(denormalize_lab(luminance.view(), chroma.view()).is_err());
    }

    #[test]
    fn grid_uses_first_ten_samples() {
        let luminance = Array4::<f32>::from_elem((12, 1, 4, 4), 0.5);
        let chroma = Array4::<f32>::from_elem((12, 2, 4, 4), 0.5);
        let grid = assemble_grid(luminance.view(), chroma.view(), chroma.view()).unwrap();
        assert_eq!(grid.shape(), &[3, 12, 40]);

        // Top row is the grey input tiled across channels.
        assert_eq!(grid[[0, 0, 0]], 0.5);
        assert_eq!(grid[[2, 3, 39]], 0.5);
    }

    #[test]
    fn grid_with_fewer_samples() {
        let luminance = Array4::<f32>::from_elem((3, 1, 2, 2), 0.3);
        let chroma = Array4::<f32>::from_elem((3, 2, 2, 2), 0.6);
        let grid = assemble_grid(luminance.view(), chroma.view(), chroma.view()).unwrap();
        assert_eq!(grid.shape(), &[3, 6, 6]);
    }

    #[test]
    fn plot_writes_scaled_png() {
        let luminance = Array4::<f32>::from_elem((2, 1, 4, 4), 0.7);
        let chroma = Array4::<f32>::from_elem((2, 2, 4, 4), 0.55);
        let path = std::env::temp_dir().join("lab_colourize_plot_test.png");
        std::fs::remove_file(&path).ok();

        plot_lab(luminance.view(), chroma.view(), chroma.view(), &path, 2).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (16, 24));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn to_image_clamps_values() {
        let grid = Array3::<f32>::from_shape_fn((3, 1, 2), |(c, _, x)| {
            if x == 0 {
                -1.0
            } else {
                c as f32
            }
        });
        let img = to_image(grid.view());
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([0, 255, 255]));
    }
}
