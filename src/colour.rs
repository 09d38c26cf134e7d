//! Pixel-level colour conversions and the discrete colour category table.

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis};
use palette::convert::FromColorUnclamped;
use palette::{IntoColor, Lab, LinSrgb, Srgb};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// sRGB in `[0, 1]` to CIE Lab (D65). Out-of-gamut input is not clipped.
pub fn rgb_to_lab(rgb: [f32; 3]) -> [f32; 3] {
    let srgb: Srgb<f32> = Srgb::new(rgb[0], rgb[1], rgb[2]);
    let lin: LinSrgb<f32> = srgb.into_linear();
    let lab: Lab = Lab::from_color_unclamped(lin);
    [lab.l, lab.a, lab.b]
}

/// CIE Lab (D65) to sRGB, clamped to `[0, 1]` for display.
pub fn lab_to_rgb(lab: [f32; 3]) -> [f32; 3] {
    let lab: Lab = Lab::new(lab[0], lab[1], lab[2]);
    let lin: LinSrgb<f32> = lab.into_color();
    let srgb: Srgb<f32> = Srgb::from_linear(lin);
    [
        srgb.red.clamp(0.0, 1.0),
        srgb.green.clamp(0.0, 1.0),
        srgb.blue.clamp(0.0, 1.0),
    ]
}

/// Convert one `(3, H, W)` image pixel by pixel.
pub(crate) fn map_pixels(image: ArrayView3<f32>, f: impl Fn([f32; 3]) -> [f32; 3]) -> Array3<f32> {
    let (_, height, width) = image.dim();
    let mut out = Array3::<f32>::zeros((3, height, width));
    for y in 0..height {
        for x in 0..width {
            let px = f([image[[0, y, x]], image[[1, y, x]], image[[2, y, x]]]);
            out[[0, y, x]] = px[0];
            out[[1, y, x]] = px[1];
            out[[2, y, x]] = px[2];
        }
    }
    out
}

/// Apply a per-pixel conversion to every image of a `(N, 3, H, W)` batch.
///
/// Images are independent, so they are converted on the rayon pool and
/// written back in sample order.
pub(crate) fn map_batch(
    images: ArrayView4<f32>,
    f: impl Fn([f32; 3]) -> [f32; 3] + Sync,
) -> Result<Array4<f32>> {
    let (n, channels, height, width) = images.dim();
    if channels != 3 {
        return Err(Error::shape_mismatch("3 colour channels", format!("{channels} channels")));
    }

    let converted: Vec<Array3<f32>> = (0..n)
        .into_par_iter()
        .map(|i| map_pixels(images.index_axis(Axis(0), i), &f))
        .collect();

    let mut out = Array4::<f32>::zeros((n, 3, height, width));
    for (i, image) in converted.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&image);
    }
    Ok(out)
}

/// Discrete RGB colour clusters, one category per entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColourTable {
    colours: Vec<[f32; 3]>,
}

const CATEGORY_CHUNK: usize = 100;

impl ColourTable {
    pub fn new(colours: Vec<[f32; 3]>) -> Result<Self> {
        if colours.is_empty() {
            return Err(Error::invalid("colours", "table must hold at least one colour"));
        }
        Ok(Self { colours })
    }

    /// Load a JSON list of `[r, g, b]` triples.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let colours: Vec<[f32; 3]> = serde_json::from_str(&contents)?;
        Self::new(colours)
    }

    pub fn len(&self) -> usize {
        self.colours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colours.is_empty()
    }

    /// Index of the closest colour (euclidean, RGB space) for every pixel.
    ///
    /// Returns a `(N, 1, H, W)` array. The batch is processed in chunks of
    /// 100 samples.
    pub fn nearest_categories(&self, images: ArrayView4<f32>) -> Result<Array4<usize>> {
        let (n, channels, height, width) = images.dim();
        if channels != 3 {
            return Err(Error::shape_mismatch(
                "3 colour channels",
                format!("{channels} channels"),
            ));
        }

        let mut out = Array4::<usize>::zeros((n, 1, height, width));
        for start in (0..n).step_by(CATEGORY_CHUNK) {
            let end = (start + CATEGORY_CHUNK).min(n);
            let chunk = images.slice(s![start..end, .., .., ..]);
            let mut target = out.slice_mut(s![start..end, .., .., ..]);
            for ((i, _, y, x), cat) in target.indexed_iter_mut() {
                let px = [chunk[[i, 0, y, x]], chunk[[i, 1, y, x]], chunk[[i, 2, y, x]]];
                *cat = self.nearest(px);
            }
        }
        Ok(out)
    }

    /// RGB image for a `(N, 1, H, W)` category map.
    pub fn category_rgb(&self, categories: ArrayView4<usize>) -> Result<Array4<f32>> {
        let (n, _, height, width) = categories.dim();
        let mut out = Array4::<f32>::zeros((n, 3, height, width));
        for ((i, _, y, x), &cat) in categories.indexed_iter() {
            let colour = self.colours.get(cat).ok_or_else(|| {
                Error::invalid(
                    "categories",
                    format!("index {cat} outside table of {}", self.colours.len()),
                )
            })?;
            for c in 0..3 {
                out[[i, c, y, x]] = colour[c];
            }
        }
        Ok(out)
    }

    fn nearest(&self, px: [f32; 3]) -> usize {
        let dist = |c: &[f32; 3]| (0..3).map(|k| (px[k] - c[k]).powi(2)).sum::<f32>();
        self.colours
            .iter()
            .enumerate()
            .min_by(|a, b| dist(a.1).total_cmp(&dist(b.1)))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array4;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn white_and_black_hit_lab_extremes() {
        let white = rgb_to_lab([1.0, 1.0, 1.0]);
        assert!(close(white[0], 100.0, 0.05));
        assert!(close(white[1], 0.0, 0.05));
        assert!(close(white[2], 0.0, 0.05));

        let black = rgb_to_lab([0.0, 0.0, 0.0]);
        assert!(close(black[0], 0.0, 1e-3));
    }

    #[test]
    fn pure_red_matches_reference_lab() {
        // Reference values for sRGB red under D65.
        let red = rgb_to_lab([1.0, 0.0, 0.0]);
        assert!(close(red[0], 53.24, 0.1));
        assert!(close(red[1], 80.09, 0.2));
        assert!(close(red[2], 67.20, 0.2));
    }

    #[test]
    fn lab_to_rgb_round_trip() {
        for rgb in [[0.2, 0.4, 0.6], [0.9, 0.1, 0.3], [0.5, 0.5, 0.5]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                assert!(close(back[c], rgb[c], 1e-3), "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn lab_to_rgb_clamps_out_of_gamut() {
        let rgb = lab_to_rgb([50.0, 127.0, -127.0]);
        assert!(rgb.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn map_batch_rejects_non_rgb() {
        let images = Array4::<f32>::zeros((2, 1, 4, 4));
        assert!(map_batch(images.view(), rgb_to_lab).is_err());
    }

    #[test]
    fn nearest_categories_pick_closest_colour() {
        let table = ColourTable::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]).unwrap();
        // 150 samples to cross the chunk boundary.
        let mut images = Array4::<f32>::zeros((150, 3, 2, 2));
        images.slice_mut(s![120.., .., 0, 0]).fill(0.9);

        let cats = table.nearest_categories(images.view()).unwrap();
        assert_eq!(cats.shape(), &[150, 1, 2, 2]);
        assert_eq!(cats[[0, 0, 0, 0]], 0);
        assert_eq!(cats[[130, 0, 0, 0]], 1);
        assert_eq!(cats[[130, 0, 1, 1]], 0);

        let rgb = table.category_rgb(cats.view()).unwrap();
        assert_eq!(rgb[[130, 2, 0, 0]], 1.0);
        assert_eq!(rgb[[130, 2, 1, 1]], 0.0);
    }

    #[test]
    fn colour_table_loads_json() {
        let path = std::env::temp_dir().join("lab_colourize_colour_table.json");
        fs::remove_file(&path).ok();
        fs::write(&path, "[[0.1, 0.2, 0.3], [0.5, 0.5, 0.5]]").unwrap();
        let table = ColourTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        fs::remove_file(path).ok();

        assert!(ColourTable::new(Vec::new()).is_err());
    }
}
