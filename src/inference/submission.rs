//! Submission file generation
//!
//! Runs the trained model over the unlabeled test directory and writes the
//! per-image predicted labels as headerless `filename,label` rows, the format
//! the grading system expects. Softmax probabilities can be written alongside
//! for later analysis.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::burn_dataset::{TestBatch, TestBatcher, TestItem};
use crate::dataset::label_name;
use crate::dataset::loader::list_test_images;
use crate::model::cnn::DefectClassifier;
use crate::utils::error::{DefectScanError, Result};

/// One row of the submission: a test image and its predicted label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRow {
    /// Bare file name of the test image
    pub filename: String,
    /// Predicted class index
    pub predicted_class: usize,
    /// Softmax probability of the predicted class
    pub confidence: f32,
    /// Full probability distribution
    pub probabilities: Vec<f32>,
}

impl SubmissionRow {
    /// The label name written to the submission file
    pub fn label(&self) -> String {
        label_name(self.predicted_class)
    }
}

/// Classify every image in `test_dir` and return one row per image.
///
/// Rows are ordered by file name. An unreadable image aborts the run with an
/// error naming the file; rows are never silently dropped.
pub fn predict_test_dir<B: Backend>(
    model: &DefectClassifier<B>,
    device: &B::Device,
    test_dir: &Path,
    image_size: usize,
    batch_size: usize,
) -> Result<Vec<SubmissionRow>> {
    let paths = list_test_images(test_dir)?;
    if paths.is_empty() {
        return Err(DefectScanError::Dataset(format!(
            "no test images found in {:?}",
            test_dir
        )));
    }

    let batcher = TestBatcher::new(image_size);
    let num_classes = model.num_classes();
    let batch_size = batch_size.max(1);

    let mut rows = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(batch_size) {
        let items: Vec<TestItem> = chunk
            .iter()
            .map(|p| TestItem::from_path(p, image_size))
            .collect::<Result<_>>()?;

        let batch: TestBatch<B> = batcher.batch(items, device);
        let filenames = batch.filenames;

        let probs = model.forward_softmax(batch.images);
        let flat: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;

        for (row, filename) in flat.chunks(num_classes).zip(filenames) {
            let (predicted_class, confidence) = row
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(idx, &p)| (idx, p))
                .unwrap_or((0, 0.0));

            rows.push(SubmissionRow {
                filename,
                predicted_class,
                confidence,
                probabilities: row.to_vec(),
            });
        }
    }

    info!("Predicted {} test images", rows.len());
    Ok(rows)
}

/// Write the submission file: headerless `filename,label` rows
pub fn write_submission(rows: &[SubmissionRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    for row in rows {
        writer.write_record([row.filename.as_str(), row.label().as_str()])?;
    }
    writer.flush()?;

    info!("Wrote {} submission rows to {:?}", rows.len(), path);
    Ok(())
}

/// Write the intermediate probabilities file: `filename,p0;p1;...` rows
pub fn write_probabilities(rows: &[SubmissionRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    for row in rows {
        let joined = row
            .probabilities
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([row.filename.as_str(), joined.as_str()])?;
    }
    writer.flush()?;

    info!("Wrote probabilities for {} images to {:?}", rows.len(), path);
    Ok(())
}

/// Predicted-label counts per class, for a quick sanity check of the output
pub fn class_counts(rows: &[SubmissionRow], num_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; num_classes];
    for row in rows {
        if row.predicted_class < num_classes {
            counts[row.predicted_class] += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cnn::DefectClassifierConfig;

    type TestBackend = burn::backend::NdArray;

    fn make_row(filename: &str, predicted: usize, probs: Vec<f32>) -> SubmissionRow {
        let confidence = probs[predicted];
        SubmissionRow {
            filename: filename.to_string(),
            predicted_class: predicted,
            confidence,
            probabilities: probs,
        }
    }

    #[test]
    fn test_row_label_mapping() {
        assert_eq!(make_row("a.jpg", 0, vec![0.9, 0.1]).label(), "norm");
        assert_eq!(make_row("a.jpg", 1, vec![0.1, 0.9]).label(), "defect1");
    }

    #[test]
    fn test_write_submission_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result/submission.csv");

        let rows = vec![
            make_row("0001.jpg", 0, vec![0.8, 0.1, 0.1]),
            make_row("0002.jpg", 2, vec![0.1, 0.2, 0.7]),
        ];
        write_submission(&rows, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["0001.jpg,norm", "0002.jpg,defect2"]);
    }

    #[test]
    fn test_write_probabilities_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probs.csv");

        let rows = vec![make_row("0001.jpg", 0, vec![0.5, 0.25, 0.25])];
        write_probabilities(&rows, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("0001.jpg,0.5;0.25;0.25"));
    }

    #[test]
    fn test_class_counts() {
        let rows = vec![
            make_row("a.jpg", 0, vec![1.0, 0.0]),
            make_row("b.jpg", 1, vec![0.0, 1.0]),
            make_row("c.jpg", 0, vec![1.0, 0.0]),
        ];
        assert_eq!(class_counts(&rows, 2), vec![2, 1]);
    }

    #[test]
    fn test_predict_test_dir_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            image::RgbImage::from_pixel(16, 16, image::Rgb([i * 60, 100, 50]))
                .save(dir.path().join(format!("{:04}.png", i)))
                .unwrap();
        }

        let device = Default::default();
        let config = DefectClassifierConfig::new()
            .with_num_classes(3)
            .with_base_filters(2)
            .with_head_units(4)
            .with_input_size(16);
        let model = DefectClassifier::<TestBackend>::new(&config, &device);

        let rows = predict_test_dir(&model, &device, dir.path(), 16, 2).unwrap();

        assert_eq!(rows.len(), 3);
        // Rows are sorted by file name
        assert_eq!(rows[0].filename, "0000.png");
        for row in &rows {
            let sum: f32 = row.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row.predicted_class < 3);
        }
    }

    #[test]
    fn test_predict_empty_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = DefectClassifierConfig::new()
            .with_num_classes(3)
            .with_base_filters(2)
            .with_head_units(4);
        let model = DefectClassifier::<TestBackend>::new(&config, &device);

        let result = predict_test_dir(&model, &device, dir.path(), 16, 4);
        assert!(matches!(result, Err(DefectScanError::Dataset(_))));
    }
}
