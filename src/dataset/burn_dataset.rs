//! Burn dataset integration
//!
//! Implements Burn's `Dataset` trait and batchers for the defect data:
//! labeled batches for training/validation, and unlabeled batches that carry
//! file names for submission generation.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::DynamicImage;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::augmentation::Augmenter;
use super::loader::load_and_resize;
use crate::utils::error::Result;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Convert a decoded image to a flattened CHW float array in [0, 1]
pub fn image_to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let num_pixels = (width * height) as usize;

    let mut data = vec![0.0f32; 3 * num_pixels];
    for (i, pixel) in rgb.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[num_pixels + i] = pixel[1] as f32 / 255.0;
        data[2 * num_pixels + i] = pixel[2] as f32 / 255.0;
    }
    data
}

/// A single labeled item ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefectItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    /// Class label (0 = norm)
    pub label: usize,
    /// Source path, kept for diagnostics
    pub path: String,
}

impl DefectItem {
    /// Load and preprocess an image file into an item
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let img = load_and_resize(path, image_size)?;
        Ok(Self::from_image(&img, label, path))
    }

    /// Build an item from an already decoded and resized image
    pub fn from_image(img: &DynamicImage, label: usize, path: &Path) -> Self {
        Self {
            image: image_to_chw(img),
            label,
            path: path.to_string_lossy().to_string(),
        }
    }

    /// Build an item from raw CHW data (used in tests)
    pub fn from_data(image: Vec<f32>, label: usize, path: String) -> Self {
        Self { image, label, path }
    }
}

/// Labeled dataset implementing Burn's `Dataset` trait.
///
/// Items are loaded lazily by default. `with_cache` decodes everything up
/// front, which is worthwhile for validation sets revisited every epoch.
/// When augmentation is enabled, items are always loaded lazily and the
/// transform for a given index is derived deterministically from the seed.
#[derive(Debug, Clone)]
pub struct DefectBurnDataset {
    samples: Vec<(PathBuf, usize)>,
    image_size: usize,
    cached_items: Option<Vec<DefectItem>>,
    augmenter: Option<Augmenter>,
    seed: u64,
}

impl DefectBurnDataset {
    /// Create a lazy dataset from (path, label) pairs
    pub fn new(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            cached_items: None,
            augmenter: None,
            seed: 0,
        }
    }

    /// Decode all images up front and keep them in memory
    pub fn with_cache(mut self) -> Result<Self> {
        let items: Result<Vec<_>> = self
            .samples
            .iter()
            .map(|(path, label)| DefectItem::from_path(path, *label, self.image_size))
            .collect();
        self.cached_items = Some(items?);
        debug!("Cached {} decoded items", self.samples.len());
        Ok(self)
    }

    /// Enable augmentation with the given seed. Disables caching.
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmenter = Some(augmenter);
        self.cached_items = None;
        self.seed = seed;
        self
    }

    /// Samples per class over the labels present
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for (_, label) in &self.samples {
            if *label < num_classes {
                counts[*label] += 1;
            }
        }
        counts
    }
}

impl Dataset<DefectItem> for DefectBurnDataset {
    fn get(&self, index: usize) -> Option<DefectItem> {
        if let Some(cached) = &self.cached_items {
            return cached.get(index).cloned();
        }

        let (path, label) = self.samples.get(index)?;
        let img = load_and_resize(path, self.image_size).ok()?;

        let img = match &self.augmenter {
            Some(augmenter) => {
                // Transform derived from (seed, index) so runs are repeatable
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9));
                augmenter.apply(img, &mut rng)
            }
            None => img,
        };

        Some(DefectItem::from_image(&img, *label, path))
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of labeled images
#[derive(Clone, Debug)]
pub struct DefectBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher building labeled batches with ImageNet normalization
#[derive(Clone, Debug)]
pub struct DefectBatcher {
    image_size: usize,
}

impl DefectBatcher {
    /// Create a batcher for the given image size
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

/// Build the [1, 3, 1, 1] mean/std tensors used for normalization
fn normalization_tensors<B: Backend>(device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let mean = Tensor::<B, 4>::from_floats(
        TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
        device,
    );
    let std = Tensor::<B, 4>::from_floats(
        TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
        device,
    );
    (mean, std)
}

/// Stack flattened CHW images into a normalized [N, 3, H, W] tensor
fn stack_images<B: Backend>(
    images: Vec<f32>,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let images = Tensor::<B, 4>::from_floats(
        TensorData::new(images, [batch_size, 3, image_size, image_size]),
        device,
    );

    let (mean, std) = normalization_tensors::<B>(device);
    (images - mean) / std
}

impl<B: Backend> Batcher<B, DefectItem, DefectBatch<B>> for DefectBatcher {
    fn batch(&self, items: Vec<DefectItem>, device: &B::Device) -> DefectBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = stack_images::<B>(images_data, batch_size, self.image_size, device);

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            device,
        );

        DefectBatch { images, targets }
    }
}

/// A single unlabeled test item
#[derive(Clone, Debug)]
pub struct TestItem {
    /// Image data as flattened CHW float array
    pub image: Vec<f32>,
    /// Bare file name, used as the submission row key
    pub filename: String,
}

impl TestItem {
    /// Load and preprocess a test image
    pub fn from_path(path: &Path, image_size: usize) -> Result<Self> {
        let img = load_and_resize(path, image_size)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Ok(Self {
            image: image_to_chw(&img),
            filename,
        })
    }
}

/// A batch of unlabeled test images with their file names
#[derive(Clone, Debug)]
pub struct TestBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// File names aligned with the batch dimension
    pub filenames: Vec<String>,
}

/// Batcher for unlabeled test batches
#[derive(Clone, Debug)]
pub struct TestBatcher {
    image_size: usize,
}

impl TestBatcher {
    /// Create a batcher for the given image size
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, TestItem, TestBatch<B>> for TestBatcher {
    fn batch(&self, items: Vec<TestItem>, device: &B::Device) -> TestBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = stack_images::<B>(images_data, batch_size, self.image_size, device);

        let filenames = items.into_iter().map(|item| item.filename).collect();

        TestBatch { images, filenames }
    }
}
