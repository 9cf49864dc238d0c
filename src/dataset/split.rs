//! Train/validation splitting
//!
//! Deterministic, seeded splitting of the labeled pool into training and
//! validation sets. The stratified strategy allocates each class
//! proportionally so rare defect types are represented in both sets.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::loader::ImageSample;
use crate::utils::error::{DefectScanError, Result};

/// Configuration for the train/validation split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of samples held out for validation
    pub val_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Maintain class balance across the split
    pub stratified: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            val_fraction: 0.10,
            seed: 42,
            stratified: true,
        }
    }
}

impl SplitConfig {
    /// Create a config with a custom validation fraction
    pub fn new(val_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&val_fraction) {
            return Err(DefectScanError::Config(format!(
                "val_fraction must be in [0, 1), got {}",
                val_fraction
            )));
        }

        Ok(Self {
            val_fraction,
            seed,
            stratified: true,
        })
    }
}

/// Result of splitting the labeled pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainValSplit {
    pub train: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
    pub config: SplitConfig,
}

impl TrainValSplit {
    /// Split the samples according to the configuration.
    ///
    /// With stratification, every class with at least two samples contributes
    /// to both sets; singleton classes go entirely to training.
    pub fn from_samples(samples: Vec<ImageSample>, config: SplitConfig) -> Result<Self> {
        if samples.is_empty() {
            return Err(DefectScanError::Dataset(
                "no samples provided for splitting".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let (train, validation) = if config.stratified {
            Self::stratified(samples, &config, &mut rng)
        } else {
            Self::random(samples, &config, &mut rng)
        };

        Ok(Self {
            train,
            validation,
            config,
        })
    }

    fn stratified(
        samples: Vec<ImageSample>,
        config: &SplitConfig,
        rng: &mut ChaCha8Rng,
    ) -> (Vec<ImageSample>, Vec<ImageSample>) {
        let mut by_class: HashMap<usize, Vec<ImageSample>> = HashMap::new();
        for sample in samples {
            by_class.entry(sample.label).or_default().push(sample);
        }

        // Iterate classes in label order so the split only depends on the seed
        let mut labels: Vec<usize> = by_class.keys().copied().collect();
        labels.sort_unstable();

        let mut train = Vec::new();
        let mut validation = Vec::new();

        for label in labels {
            let mut class_samples = by_class.remove(&label).unwrap_or_default();
            class_samples.shuffle(rng);

            let n = class_samples.len();
            let n_val = if n < 2 {
                0
            } else {
                ((n as f64 * config.val_fraction).ceil() as usize).clamp(1, n - 1)
            };

            for (i, sample) in class_samples.into_iter().enumerate() {
                if i < n_val {
                    validation.push(sample);
                } else {
                    train.push(sample);
                }
            }
        }

        train.shuffle(rng);
        (train, validation)
    }

    fn random(
        mut samples: Vec<ImageSample>,
        config: &SplitConfig,
        rng: &mut ChaCha8Rng,
    ) -> (Vec<ImageSample>, Vec<ImageSample>) {
        samples.shuffle(rng);

        let n_val = (samples.len() as f64 * config.val_fraction).round() as usize;
        let n_val = n_val.min(samples.len());

        let train = samples.split_off(n_val);
        (train, samples)
    }

    /// Total number of samples across both sets
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }

    /// (path, label) pairs for the training set
    pub fn train_pairs(&self) -> Vec<(std::path::PathBuf, usize)> {
        self.train
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }

    /// (path, label) pairs for the validation set
    pub fn validation_pairs(&self) -> Vec<(std::path::PathBuf, usize)> {
        self.validation
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }
}
