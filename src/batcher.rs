use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{Data, Int, Shape},
};
use ndarray::{ArrayView, ArrayView1, ArrayView3, ArrayView4, Axis, Dimension, Slice};

use crate::error::{Error, Result};

/// Walks two sample-aligned arrays in contiguous slices of `batch_size`.
///
/// The last batch is short when the sample count is not a multiple of the
/// batch size. No shuffling happens here.
pub struct BatchIter<'x, 'y, X, Y, DX, DY>
where
    DX: Dimension,
    DY: Dimension,
{
    x: ArrayView<'x, X, DX>,
    y: ArrayView<'y, Y, DY>,
    batch_size: usize,
    cursor: usize,
}

impl<'x, 'y, X, Y, DX, DY> BatchIter<'x, 'y, X, Y, DX, DY>
where
    DX: Dimension,
    DY: Dimension,
{
    pub fn new(
        x: ArrayView<'x, X, DX>,
        y: ArrayView<'y, Y, DY>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be positive"));
        }
        let (nx, ny) = (x.len_of(Axis(0)), y.len_of(Axis(0)));
        if nx != ny {
            return Err(Error::shape_mismatch(
                format!("{nx} samples in outputs"),
                format!("{ny} samples"),
            ));
        }
        Ok(Self {
            x,
            y,
            batch_size,
            cursor: 0,
        })
    }

    fn samples(&self) -> usize {
        self.x.len_of(Axis(0))
    }
}

impl<'x, 'y, X, Y, DX, DY> Iterator for BatchIter<'x, 'y, X, Y, DX, DY>
where
    DX: Dimension,
    DY: Dimension,
{
    type Item = (ArrayView<'x, X, DX>, ArrayView<'y, Y, DY>);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.samples();
        if self.cursor >= n {
            return None;
        }
        let end = n - (n - self.cursor).saturating_sub(self.batch_size);
        let range = Slice::from(self.cursor..end);
        self.cursor = end;

        let mut x = self.x.clone();
        x.slice_axis_inplace(Axis(0), range);
        let mut y = self.y.clone();
        y.slice_axis_inplace(Axis(0), range);
        Some((x, y))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples().saturating_sub(self.cursor);
        let batches = remaining.div_ceil(self.batch_size);
        (batches, Some(batches))
    }
}

impl<'x, 'y, X, Y, DX, DY> ExactSizeIterator for BatchIter<'x, 'y, X, Y, DX, DY>
where
    DX: Dimension,
    DY: Dimension,
{
}

pub(crate) fn to_tensor4<B: Backend>(view: ArrayView4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = view.dim();
    let values: Vec<f32> = view.iter().copied().collect();
    let data = Data::new(values, Shape::new([n, c, h, w]));
    Tensor::<B, 4>::from_data(data.convert(), device)
}

/// One sample as a `[1, C, H, W]` tensor.
fn sample_tensor<B: Backend>(view: ArrayView3<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (c, h, w) = view.dim();
    let values: Vec<f32> = view.iter().copied().collect();
    let data = Data::new(values, Shape::new([c, h, w]));
    Tensor::<B, 3>::from_data(data.convert(), device).unsqueeze()
}

/// One colourization sample: luminance `(1, H, W)` and chroma `(2, H, W)`.
#[derive(Clone, Debug)]
pub struct ColourizationItem<'a> {
    pub luminance: ArrayView3<'a, f32>,
    pub chroma: ArrayView3<'a, f32>,
}

impl<'a> ColourizationItem<'a> {
    /// Split a `BatchIter` slice into per-sample items.
    pub fn from_views(luminance: ArrayView4<'a, f32>, chroma: ArrayView4<'a, f32>) -> Vec<Self> {
        (0..luminance.len_of(Axis(0)).min(chroma.len_of(Axis(0))))
            .map(|i| Self {
                luminance: luminance.index_axis_move(Axis(0), i),
                chroma: chroma.index_axis_move(Axis(0), i),
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ColourizationBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct ColourizationBatch<B: Backend> {
    /// Normalized luminance, `[N, 1, H, W]`.
    pub luminance: Tensor<B, 4>,
    /// Normalized chroma, `[N, 2, H, W]`.
    pub chroma: Tensor<B, 4>,
}

impl<B: Backend> ColourizationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<'a, B: Backend> Batcher<ColourizationItem<'a>, ColourizationBatch<B>>
    for ColourizationBatcher<B>
{
    fn batch(&self, items: Vec<ColourizationItem<'a>>) -> ColourizationBatch<B> {
        let luminance = items
            .iter()
            .map(|item| sample_tensor(item.luminance, &self.device))
            .collect();
        let chroma = items
            .iter()
            .map(|item| sample_tensor(item.chroma, &self.device))
            .collect();

        ColourizationBatch {
            luminance: Tensor::cat(luminance, 0),
            chroma: Tensor::cat(chroma, 0),
        }
    }
}

/// One classification sample: a single Lab channel `(1, H, W)` and its label.
#[derive(Clone, Debug)]
pub struct ClassificationItem<'a> {
    pub image: ArrayView3<'a, f32>,
    pub label: u8,
}

impl<'a> ClassificationItem<'a> {
    pub fn from_views(images: ArrayView4<'a, f32>, labels: ArrayView1<'a, u8>) -> Vec<Self> {
        (0..images.len_of(Axis(0)).min(labels.len()))
            .map(|i| Self {
                image: images.index_axis_move(Axis(0), i),
                label: labels[i],
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<'a, B: Backend> Batcher<ClassificationItem<'a>, ClassificationBatch<B>>
    for ClassificationBatcher<B>
{
    fn batch(&self, items: Vec<ClassificationItem<'a>>) -> ClassificationBatch<B> {
        let images = items
            .iter()
            .map(|item| sample_tensor(item.image, &self.device))
            .collect();

        let targets: Vec<i64> = items.iter().map(|item| i64::from(item.label)).collect();
        let data = Data::new(targets, Shape::new([items.len()]));

        ClassificationBatch {
            images: Tensor::cat(images, 0),
            targets: Tensor::<B, 1, Int>::from_data(data.convert(), &self.device),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::backend::NdArray;
    use ndarray::{concatenate, Array, Array1, Array4};

    type TestBackend = NdArray;

    fn samples(n: usize) -> (Array4<f32>, Array4<f32>) {
        let x = Array::from_shape_fn((n, 1, 2, 2), |(i, _, y, x)| (i * 4 + y * 2 + x) as f32);
        let y = Array::from_shape_fn((n, 2, 2, 2), |(i, c, _, _)| (i * 2 + c) as f32);
        (x, y)
    }

    #[test]
    fn yields_partial_final_batch() {
        let (x, y) = samples(250);
        let batches = BatchIter::new(x.view(), y.view(), 100).unwrap();
        assert_eq!(batches.len(), 3);

        let sizes: Vec<usize> = batches.map(|(bx, _)| bx.len_of(Axis(0))).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn batches_concatenate_to_input() {
        let (x, y) = samples(37);
        let (xs, ys): (Vec<_>, Vec<_>) = BatchIter::new(x.view(), y.view(), 8).unwrap().unzip();
        assert_eq!(xs.len(), 5);

        assert_eq!(concatenate(Axis(0), &xs).unwrap(), x);
        assert_eq!(concatenate(Axis(0), &ys).unwrap(), y);
    }

    #[test]
    fn pairs_stay_aligned() {
        let (x, y) = samples(10);
        for (bx, by) in BatchIter::new(x.view(), y.view(), 3).unwrap() {
            for (sx, sy) in bx.outer_iter().zip(by.outer_iter()) {
                let id = sx[[0, 0, 0]] as usize / 4;
                assert_eq!(sy[[0, 0, 0]] as usize, id * 2);
            }
        }
    }

    #[test]
    fn exact_multiple_has_no_short_batch() {
        let (x, y) = samples(20);
        let sizes: Vec<usize> = BatchIter::new(x.view(), y.view(), 5)
            .unwrap()
            .map(|(bx, _)| bx.len_of(Axis(0)))
            .collect();
        assert_eq!(sizes, vec![5; 4]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let (x, y) = samples(0);
        let mut batches = BatchIter::new(x.view(), y.view(), 4).unwrap();
        assert_eq!(batches.len(), 0);
        assert!(batches.next().is_none());
    }

    #[test]
    fn works_with_label_vectors() {
        let (x, _) = samples(7);
        let labels = Array1::from_shape_fn(7, |i| i as u8);
        let collected: Vec<u8> = BatchIter::new(x.view(), labels.view(), 3)
            .unwrap()
            .flat_map(|(_, by)| by.to_vec())
            .collect();
        assert_eq!(collected, labels.to_vec());
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let (x, _) = samples(4);
        let (_, y) = samples(5);
        assert!(matches!(
            BatchIter::new(x.view(), y.view(), 2),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let (x, y) = samples(4);
        assert!(BatchIter::new(x.view(), y.view(), 0).is_err());
    }

    #[test]
    fn batchers_build_tensors() {
        let device = Default::default();
        let (x, y) = samples(3);

        let items = ColourizationItem::from_views(x.view(), y.view());
        let batch = ColourizationBatcher::<TestBackend>::new(device).batch(items);
        assert_eq!(batch.luminance.dims(), [3, 1, 2, 2]);
        assert_eq!(batch.chroma.dims(), [3, 2, 2, 2]);
        let values = batch.luminance.into_data().convert::<f32>().value;
        assert_eq!(values, x.iter().copied().collect::<Vec<_>>());
        let values = batch.chroma.into_data().convert::<f32>().value;
        assert_eq!(values, y.iter().copied().collect::<Vec<_>>());

        let labels = Array1::from_vec(vec![4u8, 0, 9]);
        let items = ClassificationItem::from_views(x.view(), labels.view());
        let batch = ClassificationBatcher::<TestBackend>::new(Default::default()).batch(items);
        assert_eq!(batch.images.dims(), [3, 1, 2, 2]);
        let targets = batch.targets.into_data().convert::<i64>().value;
        assert_eq!(targets, vec![4, 0, 9]);
    }

    #[test]
    fn huge_batch_size_is_one_batch() {
        let (x, y) = samples(3);
        let mut batches = BatchIter::new(x.view(), y.view(), usize::MAX).unwrap();
        assert_eq!(batches.len(), 1);

        let (bx, by) = batches.next().unwrap();
        assert_eq!(bx.len_of(Axis(0)), 3);
        assert_eq!(by.len_of(Axis(0)), 3);
        assert_eq!(batches.len(), 0);
        assert!(batches.next().is_none());
    }

    #[test]
    fn views_with_different_lifetimes() {
        let (x, _) = samples(5);
        let first_label = {
            let labels = Array1::from_shape_fn(5, |i| i as u8);
            let mut batches = BatchIter::new(x.view(), labels.view(), 2).unwrap();
            let (_, by) = batches.next().unwrap();
            by[0]
        };
        assert_eq!(first_label, 0);
    }
}
