use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array4, Axis};
use std::path::Path;

use crate::batcher::to_tensor4;
use crate::data::{rgb_to_lab_batch, split_lab};
use crate::error::{Error, Result};
use crate::model::{UNet, UNetConfig};
use crate::plot::{reconstruct_rgb, to_image};
use crate::train::tensor_to_array;

pub fn load_model<B: Backend>(
    config: &UNetConfig,
    path: &Path,
    device: &B::Device,
) -> Result<UNet<B>> {
    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|err| Error::Recorder {
            path: path.to_path_buf(),
            reason: format!("{err:?}"),
        })
}

/// `(1, 3, H, W)` RGB in `[0, 1]`, resized down to a multiple of `multiple`.
fn image_to_array(img: &DynamicImage, multiple: u32) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let (w, h) = (width / multiple * multiple, height / multiple * multiple);
    if w == 0 || h == 0 {
        return Err(Error::invalid(
            "input",
            format!("{width}x{height} is smaller than {multiple}x{multiple}"),
        ));
    }

    let rgb = img.resize_exact(w, h, FilterType::Lanczos3).to_rgb8();
    Ok(Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 255.0
    }))
}

/// Colourize `input` using only its luminance and write the result to `output`.
pub fn colourize_image<B: Backend>(
    model: &UNet<B>,
    config: &UNetConfig,
    input: &Path,
    output: &Path,
    device: &B::Device,
) -> Result<()> {
    let img = image::open(input).map_err(|source| Error::ImageLoad {
        path: input.to_path_buf(),
        source,
    })?;
    let (width, height) = img.dimensions();

    let rgb = image_to_array(&img, config.size_multiple() as u32)?;
    let lab = rgb_to_lab_batch(rgb.view())?;
    let (luminance, _) = split_lab(lab.view());

    let chroma = model.forward(to_tensor4::<B>(luminance.view(), device));
    let chroma = tensor_to_array(chroma)?;
    let colourized = reconstruct_rgb(luminance.view(), chroma.view())?;

    let result = to_image(colourized.index_axis(Axis(0), 0));
    let result = DynamicImage::ImageRgb8(result).resize_exact(width, height, FilterType::Lanczos3);
    result.save(output).map_err(|source| Error::ImageSave {
        path: output.to_path_buf(),
        source,
    })?;

    tracing::info!("colourized {} -> {}", input.display(), output.display());
    Ok(())
}
