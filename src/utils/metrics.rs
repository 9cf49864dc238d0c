//! Metrics for training and evaluation
//!
//! Provides the bookkeeping used by the training loop and the evaluation
//! command:
//! - Running meters (current value plus exact running average)
//! - Top-k accuracy over softmax probability rows
//! - Confusion matrix and per-class precision/recall/F1

use serde::{Deserialize, Serialize};

/// Tracks the most recent value and the exact running average of a statistic.
///
/// Used during training for loss, accuracy, and batch/data timing. Updates are
/// weighted by a count so per-batch values average correctly over uneven batch
/// sizes. Averages are exact sums over counts, never exponentially decayed.
#[derive(Debug, Clone, Default)]
pub struct RunningMeter {
    value: f64,
    sum: f64,
    count: usize,
}

impl RunningMeter {
    /// Create a new meter with no observations
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` observed over `n` samples
    pub fn update(&mut self, value: f64, n: usize) {
        self.value = value;
        self.sum += value * n as f64;
        self.count += n;
    }

    /// The most recently recorded value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The running average over all recorded samples
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Number of samples recorded
    pub fn count(&self) -> usize {
        self.count
    }

    /// Clear all observations (called at epoch boundaries)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for RunningMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} ({:.4})", self.value, self.average())
    }
}

/// Fraction of samples whose true label appears in the top `k` entries of the
/// probability row. Returns 0.0 for an empty batch.
pub fn topk_accuracy(probabilities: &[Vec<f32>], targets: &[usize], k: usize) -> f64 {
    assert_eq!(
        probabilities.len(),
        targets.len(),
        "probabilities and targets must have same length"
    );

    if probabilities.is_empty() {
        return 0.0;
    }

    let correct = probabilities
        .iter()
        .zip(targets.iter())
        .filter(|(row, &target)| {
            let mut indexed: Vec<(usize, f32)> =
                row.iter().enumerate().map(|(i, &p)| (i, p)).collect();
            indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
            indexed.iter().take(k).any(|(idx, _)| *idx == target)
        })
        .count();

    correct as f64 / probabilities.len() as f64
}

/// Confusion matrix for multi-class classification.
///
/// Rows are actual labels, columns are predicted labels, stored row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create an empty matrix for `num_classes` classes
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build a matrix from parallel prediction/ground-truth slices
    pub fn from_predictions(predictions: &[usize], targets: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(targets.iter()) {
            cm.record(actual, pred);
        }
        cm
    }

    /// Record a single prediction. Out-of-range labels are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Total number of recorded samples
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Number of samples whose actual label is `class`
    pub fn actual_count(&self, class: usize) -> usize {
        (0..self.num_classes).map(|col| self.get(class, col)).sum()
    }

    /// Number of samples predicted as `class`
    pub fn predicted_count(&self, class: usize) -> usize {
        (0..self.num_classes).map(|row| self.get(row, class)).sum()
    }

    /// Render the matrix for console output, labeling rows and columns with
    /// the given class names when provided
    pub fn render(&self, class_names: Option<&[String]>) -> String {
        let mut out = String::new();
        out.push_str("\nConfusion matrix (rows=actual, cols=predicted):\n\n");

        let label = |idx: usize| -> String {
            match class_names.and_then(|names| names.get(idx)) {
                Some(name) => {
                    let end = name
                        .char_indices()
                        .nth(8)
                        .map(|(i, _)| i)
                        .unwrap_or(name.len());
                    name[..end].to_string()
                }
                None => idx.to_string(),
            }
        };

        out.push_str("          ");
        for col in 0..self.num_classes {
            out.push_str(&format!("{:>9}", label(col)));
        }
        out.push('\n');

        for row in 0..self.num_classes {
            out.push_str(&format!("{:>9} ", label(row)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    out.push_str(&format!("[{:>6}] ", count));
                } else if count > 0 {
                    out.push_str(&format!(" {:>6}  ", count));
                } else {
                    out.push_str("      .  ");
                }
            }
            out.push('\n');
        }

        out.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));
        out
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render(None))
    }
}

/// Precision/recall/F1 for one class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Derive metrics for `class_idx` from a confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let predicted = cm.predicted_count(class_idx);
        let support = cm.actual_count(class_idx);

        let precision = if predicted > 0 {
            true_positives as f64 / predicted as f64
        } else {
            0.0
        };
        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Aggregate evaluation metrics over a validation or test pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    /// Top-5 accuracy; 0.0 unless probability rows were supplied
    pub top5_accuracy: f64,
    /// Average loss, set by the caller when available
    pub loss: Option<f64>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: Option<ConfusionMatrix>,
}

impl Metrics {
    /// Compute metrics from parallel prediction/ground-truth slices
    pub fn from_predictions(
        predictions: &[usize],
        targets: &[usize],
        num_classes: usize,
    ) -> Self {
        assert_eq!(
            predictions.len(),
            targets.len(),
            "predictions and targets must have same length"
        );

        let total_samples = predictions.len();
        if total_samples == 0 {
            return Self::default();
        }

        let cm = ConfusionMatrix::from_predictions(predictions, targets, num_classes);
        let correct_predictions = cm.correct();
        let accuracy = cm.accuracy();

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|idx| ClassMetrics::from_confusion_matrix(&cm, idx))
            .collect();

        // Macro averages over classes that actually appear in the data
        let present: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let n = present.len() as f64;
        let (macro_precision, macro_recall, macro_f1) = if n > 0.0 {
            (
                present.iter().map(|m| m.precision).sum::<f64>() / n,
                present.iter().map(|m| m.recall).sum::<f64>() / n,
                present.iter().map(|m| m.f1).sum::<f64>() / n,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            top5_accuracy: 0.0,
            loss: None,
            macro_precision,
            macro_recall,
            macro_f1,
            per_class,
            confusion_matrix: Some(cm),
        }
    }

    /// Compute metrics including top-5 accuracy from probability rows
    pub fn from_predictions_with_probs(
        predictions: &[usize],
        probabilities: &[Vec<f32>],
        targets: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut metrics = Self::from_predictions(predictions, targets, num_classes);
        metrics.top5_accuracy = topk_accuracy(probabilities, targets, 5);
        metrics
    }

    /// Summary line for logging
    pub fn summary(&self) -> String {
        format!(
            "acc {:.2}% | top-5 {:.2}% | macro-F1 {:.3} | samples {}",
            self.accuracy * 100.0,
            self.top5_accuracy * 100.0,
            self.macro_f1,
            self.total_samples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_meter() {
        let mut meter = RunningMeter::new();
        meter.update(2.0, 1);
        meter.update(4.0, 3);

        assert_eq!(meter.value(), 4.0);
        assert_eq!(meter.count(), 4);
        // (2.0 * 1 + 4.0 * 3) / 4 = 3.5
        assert!((meter.average() - 3.5).abs() < 1e-9);

        meter.reset();
        assert_eq!(meter.count(), 0);
        assert_eq!(meter.average(), 0.0);
    }

    #[test]
    fn test_topk_accuracy() {
        let probs = vec![
            vec![0.7, 0.2, 0.1], // top-1 hit for target 0
            vec![0.1, 0.3, 0.6], // target 1 only in top-2
            vec![0.5, 0.4, 0.1], // target 2 not in top-2
        ];
        let targets = vec![0, 1, 2];

        assert!((topk_accuracy(&probs, &targets, 1) - 1.0 / 3.0).abs() < 1e-9);
        assert!((topk_accuracy(&probs, &targets, 2) - 2.0 / 3.0).abs() < 1e-9);
        assert!((topk_accuracy(&probs, &targets, 3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_topk_accuracy_empty() {
        assert_eq!(topk_accuracy(&[], &[], 1), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0];
        let targets = vec![0, 1, 2, 0, 2, 2, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &targets, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 2);
        assert_eq!(cm.get(2, 1), 1); // actual defect2 predicted defect1
        assert_eq!(cm.total(), 8);
        assert_eq!(cm.correct(), 6);
        assert!((cm.accuracy() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let targets = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &targets, 2);
        let norm = ClassMetrics::from_confusion_matrix(&cm, 0);

        // norm: TP=2, predicted=3, support=3
        assert!((norm.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((norm.recall - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(norm.support, 3);
    }

    #[test]
    fn test_metrics_from_predictions() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0];
        let targets = vec![0, 1, 2, 0, 2, 2, 1, 0];

        let metrics = Metrics::from_predictions(&predictions, &targets, 3);

        assert_eq!(metrics.total_samples, 8);
        assert_eq!(metrics.correct_predictions, 6);
        assert!((metrics.accuracy - 0.75).abs() < 1e-9);
        assert_eq!(metrics.per_class.len(), 3);
    }

    #[test]
    fn test_metrics_with_probs() {
        let probs = vec![vec![0.9, 0.05, 0.05], vec![0.1, 0.2, 0.7]];
        let predictions = vec![0, 2];
        let targets = vec![0, 1];

        let metrics = Metrics::from_predictions_with_probs(&predictions, &probs, &targets, 3);
        assert!((metrics.accuracy - 0.5).abs() < 1e-9);
        // 3 classes, so top-5 covers everything
        assert!((metrics.top5_accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = Metrics::from_predictions(&[], &[], 12);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(metrics.accuracy, 0.0);
    }
}
