//! Dataset module for defect inspection data
//!
//! This module provides:
//! - Loading labeled samples from a label-list CSV or a class-per-directory tree
//! - Burn `Dataset`/`Batcher` integration for training and test batches
//! - Deterministic stratified train/validation splitting
//! - Training-time augmentation (horizontal flip, fixed-angle rotation)
//!
//! ## Label scheme
//!
//! Label 0 is the normal class (`norm`); label k >= 1 is the k-th defect type
//! (`defect1`, `defect2`, ...). Submission files use these names verbatim.

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

// Re-export main types for convenience
pub use augmentation::Augmenter;
pub use burn_dataset::{
    DefectBatch, DefectBatcher, DefectBurnDataset, DefectItem, TestBatch, TestBatcher, TestItem,
};
pub use loader::{DatasetStats, DefectDataset, ImageSample};
pub use split::{SplitConfig, TrainValSplit};

/// Image file extensions accepted by the loaders
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Name of the label with the given index: `norm` for 0, `defect<k>` otherwise
pub fn label_name(label: usize) -> String {
    if label == 0 {
        "norm".to_string()
    } else {
        format!("defect{}", label)
    }
}

/// Index of the label with the given name, if it follows the naming scheme
pub fn label_index(name: &str) -> Option<usize> {
    if name == "norm" {
        return Some(0);
    }
    name.strip_prefix("defect")
        .and_then(|k| k.parse::<usize>().ok())
        .filter(|&k| k >= 1)
}

/// Whether a label denotes a defect-free sample
pub fn is_normal(label: usize) -> bool {
    label == 0
}

/// Whether a path has an accepted image extension
pub fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
