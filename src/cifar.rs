//! CIFAR-10 loader for the binary distribution of the dataset.
//!
//! Each record is one label byte followed by 3072 pixel bytes laid out as
//! 3 planes (R, G, B) of 32x32, row major.

use ndarray::{Array1, Array4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
const BYTES_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const BYTES_PER_RECORD: usize = BYTES_PER_IMAGE + 1;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// The ten CIFAR-10 classes, in label order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Airplane = 0,
    Automobile = 1,
    Bird = 2,
    Cat = 3,
    Deer = 4,
    Dog = 5,
    Frog = 6,
    Horse = 7,
    Ship = 8,
    Truck = 9,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Airplane,
        Category::Automobile,
        Category::Bird,
        Category::Cat,
        Category::Deer,
        Category::Dog,
        Category::Frog,
        Category::Horse,
        Category::Ship,
        Category::Truck,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// One split of the dataset: raw pixel values in `[0, 255]` and aligned labels.
#[derive(Clone, Debug)]
pub struct CifarSplit {
    pub images: Array4<f32>,
    pub labels: Array1<u8>,
}

impl CifarSplit {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Decode a buffer of concatenated records.
    pub fn from_records(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % BYTES_PER_RECORD != 0 {
            return Err(Error::shape_mismatch(
                format!("a multiple of {BYTES_PER_RECORD} bytes"),
                format!("{} bytes", bytes.len()),
            ));
        }
        let count = bytes.len() / BYTES_PER_RECORD;

        let mut labels = Vec::with_capacity(count);
        let mut pixels = Vec::with_capacity(count * BYTES_PER_IMAGE);
        for record in bytes.chunks_exact(BYTES_PER_RECORD) {
            labels.push(record[0]);
            pixels.extend(record[1..].iter().map(|&p| f32::from(p)));
        }

        let images = Array4::from_shape_vec((count, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), pixels)
            .map_err(|err| Error::shape_mismatch("CIFAR record layout", err))?;

        Ok(Self {
            images,
            labels: Array1::from_vec(labels),
        })
    }

    fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| Error::DatasetRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_records(&bytes)
    }

    fn concat(splits: Vec<CifarSplit>) -> Result<Self> {
        let images: Vec<_> = splits.iter().map(|s| s.images.view()).collect();
        let labels: Vec<_> = splits.iter().map(|s| s.labels.view()).collect();
        let images = ndarray::concatenate(ndarray::Axis(0), &images)
            .map_err(|err| Error::shape_mismatch("matching CIFAR batch shapes", err))?;
        let labels = ndarray::concatenate(ndarray::Axis(0), &labels)
            .map_err(|err| Error::shape_mismatch("matching CIFAR label shapes", err))?;
        Ok(Self { images, labels })
    }
}

#[derive(Clone, Debug)]
pub struct Cifar10 {
    pub train: CifarSplit,
    pub test: CifarSplit,
}

impl Cifar10 {
    /// Load the five training batches and the test batch from `dir`.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let train = TRAIN_FILES
            .iter()
            .map(|name| CifarSplit::read(&dir.join(name)))
            .collect::<Result<Vec<_>>>()?;
        let train = CifarSplit::concat(train)?;
        let test = CifarSplit::read(&dir.join(TEST_FILE))?;

        tracing::info!(
            train = train.len(),
            test = test.len(),
            "loaded CIFAR-10 from {}",
            dir.display()
        );

        Ok(Self { train, test })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(BYTES_PER_IMAGE));
        bytes
    }

    #[test]
    fn decodes_records_in_order() {
        let mut bytes = record(7, 10);
        bytes.extend(record(2, 200));

        let split = CifarSplit::from_records(&bytes).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split.images.shape(), &[2, 3, 32, 32]);
        assert_eq!(split.labels.to_vec(), vec![7, 2]);
        assert_eq!(split.images[[0, 2, 31, 31]], 10.0);
        assert_eq!(split.images[[1, 0, 0, 0]], 200.0);
    }

    #[test]
    fn channel_planes_follow_record_layout() {
        let mut bytes = vec![0u8];
        bytes.extend(std::iter::repeat(1).take(IMAGE_SIZE * IMAGE_SIZE));
        bytes.extend(std::iter::repeat(2).take(IMAGE_SIZE * IMAGE_SIZE));
        bytes.extend(std::iter::repeat(3).take(IMAGE_SIZE * IMAGE_SIZE));

        let split = CifarSplit::from_records(&bytes).unwrap();
        assert_eq!(split.images[[0, 0, 5, 5]], 1.0);
        assert_eq!(split.images[[0, 1, 5, 5]], 2.0);
        assert_eq!(split.images[[0, 2, 5, 5]], 3.0);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let bytes = vec![0u8; BYTES_PER_RECORD + 5];
        assert!(matches!(
            CifarSplit::from_records(&bytes),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn missing_directory_reports_path() {
        let err = Cifar10::load_dir("/nonexistent/cifar-10").unwrap_err();
        assert!(matches!(err, Error::DatasetRead { .. }));
    }

    #[test]
    fn category_ids_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_id(category.id()), Some(category));
        }
        assert_eq!(Category::Horse.id(), 7);
        assert_eq!(Category::from_id(10), None);
        let json = serde_json::to_string(&Category::Deer).unwrap();
        assert_eq!(json, "\"deer\"");
    }
}
