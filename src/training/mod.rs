//! Training module
//!
//! This module provides:
//! - A manual mini-batch training loop over Burn's autodiff and optimizer APIs
//! - Running meters and periodic progress logging
//! - Checkpointing with best-accuracy and lowest-loss copies
//! - Learning rate scheduling and early stopping
//!
//! ## Loop structure
//!
//! Each epoch shuffles the training indices with a seeded RNG, iterates
//! mini-batches (forward, cross-entropy, backward, Adam step), then runs a
//! validation pass. Improvements in validation accuracy or loss trigger
//! checkpoint copies; stalls feed the plateau scheduler and early stopping.

pub mod checkpoint;
pub mod run;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{CheckpointKind, CheckpointManager};
pub use run::{run_training, TrainingSummary};
pub use scheduler::LrScheduler;
pub use trainer::{EpochStats, Trainer, TrainingState, ValidationStats};

// Re-export TrainingConfig from model::config where it's defined
pub use crate::model::config::TrainingConfig;

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 50;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;
