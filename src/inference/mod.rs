//! Inference module
//!
//! This module provides:
//! - Single image and batched prediction from trained checkpoints
//! - Submission file generation from softmax probabilities

pub mod predictor;
pub mod submission;

// Re-export main types for convenience
pub use predictor::{PredictionResult, Predictor};
pub use submission::{
    class_counts, predict_test_dir, write_probabilities, write_submission, SubmissionRow,
};

/// Default batch size for test-set inference
pub const DEFAULT_INFERENCE_BATCH_SIZE: usize = 32;

/// Default confidence threshold for flagging uncertain predictions
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;
