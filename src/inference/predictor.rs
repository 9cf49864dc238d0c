//! Prediction from trained checkpoints
//!
//! Loads a model record and runs single-image or batched inference, turning
//! softmax outputs into ranked predictions with class names attached.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::data::dataloader::batcher::Batcher;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::burn_dataset::{TestBatch, TestBatcher, TestItem};
use crate::dataset::label_name;
use crate::model::cnn::{DefectClassifier, DefectClassifierConfig};
use crate::utils::error::{DefectScanError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,

    /// Predicted class index
    pub predicted_class: usize,

    /// Predicted label name (`norm` or `defect<k>`)
    pub label: String,

    /// Softmax probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,

    /// Top-k (index, label, probability) triples, best first
    pub top_k: Vec<(usize, String, f32)>,

    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Build a result from a softmax probability row
    pub fn new(
        probabilities: Vec<f32>,
        inference_time: Duration,
        image_path: Option<PathBuf>,
    ) -> Self {
        let (predicted_class, confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(idx, &p)| (idx, p))
            .unwrap_or((0, 0.0));

        let mut indexed: Vec<(usize, f32)> = probabilities
            .iter()
            .enumerate()
            .map(|(i, &p)| (i, p))
            .collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k: Vec<(usize, String, f32)> = indexed
            .iter()
            .take(5)
            .map(|&(idx, prob)| (idx, label_name(idx), prob))
            .collect();

        Self {
            image_path,
            predicted_class,
            label: label_name(predicted_class),
            confidence,
            probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    /// Whether the prediction clears a confidence threshold
    pub fn is_high_confidence(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// Probability margin between the top two predictions
    pub fn margin(&self) -> f32 {
        if self.top_k.len() >= 2 {
            self.top_k[0].2 - self.top_k[1].2
        } else {
            self.confidence
        }
    }

    /// Multi-line rendering for console output
    pub fn display(&self) -> String {
        let mut out = String::new();

        if let Some(path) = &self.image_path {
            out.push_str(&format!("Image: {:?}\n", path));
        }
        out.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.label, self.predicted_class
        ));
        out.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        out.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        out.push_str("\nTop predictions:\n");
        for (i, (idx, name, prob)) in self.top_k.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {} (class {}) - {:.2}%\n",
                i + 1,
                name,
                idx,
                prob * 100.0
            ));
        }

        out
    }
}

/// Runs inference with a trained model
pub struct Predictor<B: Backend> {
    model: DefectClassifier<B>,
    device: B::Device,
    image_size: usize,
    batcher: TestBatcher,
}

impl<B: Backend> Predictor<B> {
    /// Wrap an already loaded model
    pub fn new(model: DefectClassifier<B>, device: B::Device, image_size: usize) -> Self {
        Self {
            model,
            device,
            image_size,
            batcher: TestBatcher::new(image_size),
        }
    }

    /// Load a model record produced by training.
    ///
    /// `record_path` is the path without the recorder extension, e.g.
    /// `output/run1/model_best`.
    pub fn from_record(
        model_config: &DefectClassifierConfig,
        record_path: &Path,
        device: B::Device,
    ) -> Result<Self> {
        info!("Loading model record from {:?}", record_path);

        let recorder = CompactRecorder::new();
        let model = DefectClassifier::new(model_config, &device);
        let model = model
            .load_file(record_path.to_path_buf(), &recorder, &device)
            .map_err(|e| {
                DefectScanError::Model(format!(
                    "failed to load record {:?}: {:?}",
                    record_path, e
                ))
            })?;

        Ok(Self::new(model, device, model_config.input_size))
    }

    /// Number of classes the model predicts
    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Predict a single image file
    pub fn predict_path(&self, path: &Path) -> Result<PredictionResult> {
        let item = TestItem::from_path(path, self.image_size)?;

        let start = Instant::now();
        let batch: TestBatch<B> = self.batcher.batch(vec![item], &self.device);
        let probs = self.model.forward_softmax(batch.images);
        let row: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;
        let elapsed = start.elapsed();

        Ok(PredictionResult::new(
            row,
            elapsed,
            Some(path.to_path_buf()),
        ))
    }

    /// Predict multiple image files, batching the forward passes
    pub fn predict_paths(
        &self,
        paths: &[PathBuf],
        batch_size: usize,
    ) -> Result<Vec<PredictionResult>> {
        let batch_size = batch_size.max(1);
        let num_classes = self.num_classes();
        let mut results = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(batch_size) {
            let items: Vec<TestItem> = chunk
                .iter()
                .map(|p| TestItem::from_path(p, self.image_size))
                .collect::<Result<_>>()?;

            let start = Instant::now();
            let batch: TestBatch<B> = self.batcher.batch(items, &self.device);
            let probs = self.model.forward_softmax(batch.images);
            let flat: Vec<f32> = probs
                .into_data()
                .to_vec()
                .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;
            let per_image = start.elapsed() / chunk.len().max(1) as u32;

            for (row, path) in flat.chunks(num_classes).zip(chunk.iter()) {
                results.push(PredictionResult::new(
                    row.to_vec(),
                    per_image,
                    Some(path.clone()),
                ));
            }
        }

        Ok(results)
    }

    /// Predict an image already loaded in memory
    pub fn predict_image(&self, img: &image::DynamicImage) -> Result<PredictionResult> {
        let resized = img.resize_exact(
            self.image_size as u32,
            self.image_size as u32,
            image::imageops::FilterType::Triangle,
        );
        let item = TestItem {
            image: crate::dataset::burn_dataset::image_to_chw(&resized),
            filename: String::new(),
        };

        let start = Instant::now();
        let batch: TestBatch<B> = self.batcher.batch(vec![item], &self.device);
        let probs = self.model.forward_softmax(batch.images);
        let row: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;

        Ok(PredictionResult::new(row, start.elapsed(), None))
    }

    /// Access the underlying model
    pub fn model(&self) -> &DefectClassifier<B> {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn tiny_predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        let config = DefectClassifierConfig::new()
            .with_num_classes(4)
            .with_base_filters(2)
            .with_head_units(4)
            .with_input_size(16);
        let model = DefectClassifier::new(&config, &device);
        Predictor::new(model, device, 16)
    }

    #[test]
    fn test_prediction_result_ranking() {
        let mut probs = vec![0.02f32; 10];
        probs[3] = 0.6;
        probs[7] = 0.24;

        let result = PredictionResult::new(probs, Duration::from_millis(5), None);

        assert_eq!(result.predicted_class, 3);
        assert_eq!(result.label, "defect3");
        assert!((result.confidence - 0.6).abs() < 1e-6);
        assert_eq!(result.top_k.len(), 5);
        assert_eq!(result.top_k[0].0, 3);
        assert_eq!(result.top_k[1].0, 7);
        assert!((result.margin() - 0.36).abs() < 1e-5);
    }

    #[test]
    fn test_prediction_result_norm_label() {
        let probs = vec![0.9f32, 0.05, 0.05];
        let result = PredictionResult::new(probs, Duration::from_millis(1), None);
        assert_eq!(result.label, "norm");
        assert!(result.is_high_confidence(0.8));
        assert!(!result.is_high_confidence(0.95));
    }

    #[test]
    fn test_predict_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.png");
        image::RgbImage::from_pixel(16, 16, image::Rgb([128, 128, 128]))
            .save(&path)
            .unwrap();

        let predictor = tiny_predictor();
        let result = predictor.predict_path(&path).unwrap();

        assert_eq!(result.probabilities.len(), 4);
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(result.predicted_class < 4);
    }

    #[test]
    fn test_predict_paths_batched() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("{}.png", i));
            image::RgbImage::from_pixel(16, 16, image::Rgb([(i * 40) as u8, 10, 10]))
                .save(&path)
                .unwrap();
            paths.push(path);
        }

        let predictor = tiny_predictor();
        let results = predictor.predict_paths(&paths, 2).unwrap();

        assert_eq!(results.len(), 5);
        for result in &results {
            let sum: f32 = result.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_predict_missing_file_is_error() {
        let predictor = tiny_predictor();
        let result = predictor.predict_path(Path::new("/nope/missing.jpg"));
        assert!(matches!(result, Err(DefectScanError::ImageLoad(_, _))));
    }
}
