//! Training hyperparameter configuration
//!
//! Serde-serializable configuration persisted next to checkpoints so a run
//! can be reproduced from its output directory alone.

use serde::{Deserialize, Serialize};

use crate::utils::error::{DefectScanError, Result};

/// Learning rate schedule selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Constant learning rate
    Constant,
    /// Divide the rate by `divisor` every `interval` epochs
    Step { interval: usize, divisor: f64 },
    /// Divide the rate by `divisor` when validation accuracy stalls for
    /// `patience` epochs
    Plateau { patience: usize, divisor: f64 },
    /// Cosine decay from the initial rate to `min_lr` over the run
    Cosine { min_lr: f64 },
}

impl Default for LrSchedule {
    fn default() -> Self {
        // The competition baseline divides the rate on validation plateaus
        Self::Plateau {
            patience: 3,
            divisor: 5.0,
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,

    /// Batch size for training and validation
    pub batch_size: usize,

    /// Initial learning rate
    pub learning_rate: f64,

    /// Weight decay (L2 regularization)
    pub weight_decay: f64,

    /// Learning rate schedule
    pub lr_schedule: LrSchedule,

    /// Log a progress line every N batches
    pub print_freq: usize,

    /// Save a checkpoint every N epochs (improvements are always saved)
    pub checkpoint_interval: usize,

    /// Stop after this many epochs without validation improvement
    pub early_stopping_patience: Option<usize>,

    /// Fraction of labeled data held out for validation
    pub val_fraction: f64,

    /// Random seed for splitting, shuffling, and augmentation
    pub seed: u64,

    /// Input image size
    pub image_size: usize,

    /// Apply flip/rotation augmentation to training images
    pub augment: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 64,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            lr_schedule: LrSchedule::default(),
            print_freq: 10,
            checkpoint_interval: 1,
            early_stopping_patience: Some(10),
            val_fraction: 0.10,
            seed: 42,
            image_size: crate::IMAGE_SIZE,
            augment: true,
        }
    }
}

impl TrainingConfig {
    /// A small, fast configuration for smoke tests
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 8,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            lr_schedule: LrSchedule::Constant,
            print_freq: 1,
            checkpoint_interval: 1,
            early_stopping_patience: None,
            val_fraction: 0.2,
            seed: 42,
            image_size: 64,
            augment: false,
        }
    }

    /// Validate the configuration before training starts
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(DefectScanError::Config("epochs must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(DefectScanError::Config("batch_size must be > 0".to_string()));
        }
        if self.learning_rate <= 0.0 {
            return Err(DefectScanError::Config(
                "learning_rate must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            return Err(DefectScanError::Config(
                "val_fraction must be in [0, 1)".to_string(),
            ));
        }
        if self.image_size == 0 {
            return Err(DefectScanError::Config("image_size must be > 0".to_string()));
        }
        match self.lr_schedule {
            LrSchedule::Step { interval, divisor } if interval == 0 || divisor <= 1.0 => {
                Err(DefectScanError::Config(
                    "step schedule needs interval > 0 and divisor > 1".to_string(),
                ))
            }
            LrSchedule::Plateau { divisor, .. } if divisor <= 1.0 => Err(DefectScanError::Config(
                "plateau schedule needs divisor > 1".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DefectScanError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| DefectScanError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
        assert!(TrainingConfig::debug().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TrainingConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.val_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.lr_schedule = LrSchedule::Step {
            interval: 0,
            divisor: 5.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = TrainingConfig {
            epochs: 7,
            lr_schedule: LrSchedule::Step {
                interval: 4,
                divisor: 10.0,
            },
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.epochs, 7);
        assert_eq!(
            loaded.lr_schedule,
            LrSchedule::Step {
                interval: 4,
                divisor: 10.0
            }
        );
    }
}
