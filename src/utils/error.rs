//! Error Handling Module
//!
//! Defines custom error types for the defectscan library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for defectscan operations
#[derive(Error, Debug)]
pub enum DefectScanError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model operations (initialization, record save/load)
    #[error("Model error: {0}")]
    Model(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// Error during inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for defectscan operations
pub type Result<T> = std::result::Result<T, DefectScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DefectScanError::Dataset("no samples".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no samples");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/test/0001.jpg");
        let err = DefectScanError::ImageLoad(path, "truncated file".to_string());
        assert!(format!("{}", err).contains("0001.jpg"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DefectScanError = io_err.into();
        assert!(matches!(err, DefectScanError::Io(_)));
    }
}
