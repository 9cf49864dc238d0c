//! # defectscan
//!
//! A Rust pipeline for surface defect classification using the Burn framework.
//! Products on an inspection line are photographed and classified as either
//! normal (`norm`) or one of several defect types (`defect1`, `defect2`, ...).
//!
//! ## Modules
//!
//! - `dataset`: Label-list loading, directory scanning, augmentation, and
//!   train/validation splitting
//! - `model`: CNN architecture built with Burn
//! - `training`: Manual mini-batch training loop, meters, checkpointing, and
//!   learning rate scheduling
//! - `inference`: Prediction from trained checkpoints and submission file
//!   generation
//! - `utils`: Logging, metrics, and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use defectscan::dataset::DefectDataset;
//! use defectscan::model::cnn::DefectClassifierConfig;
//!
//! let dataset = DefectDataset::from_label_csv("data/train.csv", "data/images")?;
//! let config = DefectClassifierConfig::new();
//! // ... training and inference
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::burn_dataset::{
    DefectBatch, DefectBatcher, DefectBurnDataset, DefectItem, TestBatch, TestBatcher, TestItem,
};
pub use dataset::loader::{DatasetStats, DefectDataset, ImageSample};
pub use dataset::split::{SplitConfig, TrainValSplit};
pub use inference::predictor::{PredictionResult, Predictor};
pub use inference::submission::{write_submission, SubmissionRow};
pub use model::cnn::DefectClassifier;
pub use model::config::TrainingConfig;
pub use training::checkpoint::CheckpointManager;
pub use training::trainer::{Trainer, TrainingState};
pub use utils::error::{DefectScanError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics, RunningMeter};

/// Default number of classes: one `norm` class plus eleven defect types
pub const NUM_CLASSES: usize = 12;

/// Default input image size (images are resized to squares of this side)
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
