//! Manual training loop
//!
//! Implements mini-batch gradient descent directly on top of Burn's autodiff
//! and optimizer APIs rather than the high-level learner. Each batch runs a
//! forward pass, cross-entropy loss, backward pass, and an Adam step; running
//! meters track loss, accuracy, and timing, with a progress line every
//! `print_freq` batches.

use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{activation::softmax, backend::AutodiffBackend, backend::Backend, ElementConversion, Int, Tensor},
};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scheduler::LrScheduler;
use crate::dataset::burn_dataset::{DefectBatch, DefectBatcher, DefectBurnDataset};
use crate::model::cnn::DefectClassifier;
use crate::model::config::TrainingConfig;
use crate::utils::error::{DefectScanError, Result};
use crate::utils::metrics::{Metrics, RunningMeter};

/// Mutable bookkeeping of a training run, persisted next to checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Optimizer steps taken in the current epoch
    pub iteration: usize,
    /// Total training samples seen
    pub samples_seen: usize,
    /// Best validation accuracy so far
    pub best_accuracy: f64,
    /// Lowest validation loss so far
    pub lowest_loss: f64,
    /// Epochs since the last accuracy improvement
    pub epochs_without_improvement: usize,
    /// Learning rate in effect
    pub current_lr: f64,
    /// Per-epoch training loss
    pub train_loss_history: Vec<f64>,
    /// Per-epoch validation accuracy
    pub val_accuracy_history: Vec<f64>,
    /// Per-epoch validation loss
    pub val_loss_history: Vec<f64>,
}

impl TrainingState {
    /// Create a fresh state with the initial learning rate
    pub fn new(initial_lr: f64) -> Self {
        Self {
            epoch: 0,
            iteration: 0,
            samples_seen: 0,
            best_accuracy: 0.0,
            // f64::MAX rather than infinity so the JSON sidecar stays lossless
            lowest_loss: f64::MAX,
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            train_loss_history: Vec::new(),
            val_accuracy_history: Vec::new(),
            val_loss_history: Vec::new(),
        }
    }
}

/// Loss/accuracy summary of one training epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
}

/// Result of a validation pass
#[derive(Debug, Clone)]
pub struct ValidationStats {
    pub loss: f64,
    pub accuracy: f64,
    pub metrics: Metrics,
}

/// Trainer driving the manual loop for a `DefectClassifier`
pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DefectClassifier<B>, B>,
{
    model: DefectClassifier<B>,
    optimizer: O,
    config: TrainingConfig,
    scheduler: LrScheduler,
    /// Current training state
    pub state: TrainingState,
    device: B::Device,
    num_classes: usize,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DefectClassifier<B>, B>,
{
    /// Create a trainer from an initialized model and optimizer
    pub fn new(
        model: DefectClassifier<B>,
        optimizer: O,
        config: TrainingConfig,
        device: B::Device,
    ) -> Self {
        let scheduler = LrScheduler::new(config.lr_schedule, config.learning_rate, config.epochs);
        let state = TrainingState::new(config.learning_rate);
        let num_classes = model.num_classes();

        Self {
            model,
            optimizer,
            config,
            scheduler,
            state,
            device,
            num_classes,
        }
    }

    /// Train for one epoch over the dataset, shuffling with the given RNG
    pub fn train_epoch(
        &mut self,
        dataset: &DefectBurnDataset,
        batcher: &DefectBatcher,
        rng: &mut ChaCha8Rng,
    ) -> Result<EpochStats> {
        let mut batch_time = RunningMeter::new();
        let mut data_time = RunningMeter::new();
        let mut losses = RunningMeter::new();
        let mut accuracy = RunningMeter::new();

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let batch_size = self.config.batch_size;
        let num_batches = indices.len().div_ceil(batch_size);

        self.state.iteration = 0;
        let mut end = Instant::now();

        for batch_idx in 0..num_batches {
            let lo = batch_idx * batch_size;
            let hi = (lo + batch_size).min(indices.len());
            let items: Vec<_> = indices[lo..hi]
                .iter()
                .filter_map(|&i| dataset.get(i))
                .collect();
            if items.is_empty() {
                warn!("Batch {} had no loadable images, skipping", batch_idx + 1);
                continue;
            }
            data_time.update(end.elapsed().as_secs_f64(), 1);

            let batch: DefectBatch<B> = batcher.batch(items, &self.device);
            let output = self.model.forward(batch.images);

            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let (correct, total) = batch_accuracy(&output, &batch.targets)?;
            losses.update(loss_value, total);
            accuracy.update(correct as f64 / total as f64, total);

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.state.current_lr, self.model.clone(), grads);

            self.state.iteration += 1;
            self.state.samples_seen += total;

            batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();

            if (batch_idx + 1) % self.config.print_freq == 0 || batch_idx + 1 == num_batches {
                info!(
                    "Epoch [{}][{}/{}] time {} data {} loss {} acc {:.3} ({:.3})",
                    self.state.epoch + 1,
                    batch_idx + 1,
                    num_batches,
                    batch_time,
                    data_time,
                    losses,
                    accuracy.value(),
                    accuracy.average(),
                );
            }
        }

        let stats = EpochStats {
            loss: losses.average(),
            accuracy: accuracy.average(),
        };
        self.state.train_loss_history.push(stats.loss);

        info!(
            "Epoch {} training: loss {:.4}, accuracy {:.2}%",
            self.state.epoch + 1,
            stats.loss,
            stats.accuracy * 100.0
        );

        Ok(stats)
    }

    /// Evaluate on a validation dataset without gradient tracking
    pub fn validate(
        &self,
        dataset: &DefectBurnDataset,
        batcher: &DefectBatcher,
    ) -> Result<ValidationStats> {
        let model = self.model.valid();

        let mut batch_time = RunningMeter::new();
        let mut losses = RunningMeter::new();
        let mut accuracy = RunningMeter::new();

        let mut all_predictions: Vec<usize> = Vec::new();
        let mut all_probabilities: Vec<Vec<f32>> = Vec::new();
        let mut all_targets: Vec<usize> = Vec::new();

        let batch_size = self.config.batch_size;
        let len = dataset.len();
        let num_batches = len.div_ceil(batch_size);
        let mut end = Instant::now();

        for batch_idx in 0..num_batches {
            let lo = batch_idx * batch_size;
            let hi = (lo + batch_size).min(len);
            let items: Vec<_> = (lo..hi).filter_map(|i| dataset.get(i)).collect();
            if items.is_empty() {
                continue;
            }

            let batch: DefectBatch<B::InnerBackend> = batcher.batch(items, &self.device);
            let output = model.forward(batch.images);

            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output.clone(), batch.targets.clone());
            let loss_value: f64 = loss.into_scalar().elem();

            let (correct, total) = batch_accuracy(&output, &batch.targets)?;
            losses.update(loss_value, total);
            accuracy.update(correct as f64 / total as f64, total);

            let probs = softmax(output, 1);
            collect_rows(
                probs,
                &batch.targets,
                self.num_classes,
                &mut all_predictions,
                &mut all_probabilities,
                &mut all_targets,
            )?;

            batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();

            if (batch_idx + 1) % self.config.print_freq == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "Val [{}/{}] time {} loss {} acc {:.3} ({:.3})",
                    batch_idx + 1,
                    num_batches,
                    batch_time,
                    losses,
                    accuracy.value(),
                    accuracy.average(),
                );
            }
        }

        let mut metrics = Metrics::from_predictions_with_probs(
            &all_predictions,
            &all_probabilities,
            &all_targets,
            self.num_classes,
        );
        metrics.loss = Some(losses.average());

        info!(
            " * Val acc {:.3}% (best: {:.3}%) | loss {:.4} (lowest: {:.4})",
            accuracy.average() * 100.0,
            self.state.best_accuracy * 100.0,
            losses.average(),
            self.state.lowest_loss,
        );

        Ok(ValidationStats {
            loss: losses.average(),
            accuracy: accuracy.average(),
            metrics,
        })
    }

    /// Record a validation result.
    ///
    /// Returns `(is_best, is_lowest_loss)` for checkpointing.
    pub fn update_best(&mut self, val_accuracy: f64, val_loss: f64) -> (bool, bool) {
        self.state.val_accuracy_history.push(val_accuracy);
        self.state.val_loss_history.push(val_loss);

        let is_best = val_accuracy > self.state.best_accuracy;
        if is_best {
            info!(
                "Validation accuracy improved: {:.2}% -> {:.2}%",
                self.state.best_accuracy * 100.0,
                val_accuracy * 100.0
            );
            self.state.best_accuracy = val_accuracy;
            self.state.epochs_without_improvement = 0;
        } else {
            self.state.epochs_without_improvement += 1;
            debug!(
                "No improvement for {} epochs (best: {:.2}%)",
                self.state.epochs_without_improvement,
                self.state.best_accuracy * 100.0
            );
        }

        let is_lowest_loss = val_loss < self.state.lowest_loss;
        if is_lowest_loss {
            self.state.lowest_loss = val_loss;
        }

        (is_best, is_lowest_loss)
    }

    /// Whether the early stopping criterion is met
    pub fn should_early_stop(&self) -> bool {
        if let Some(patience) = self.config.early_stopping_patience {
            if self.state.epochs_without_improvement >= patience {
                warn!(
                    "Early stopping triggered after {} epochs without improvement",
                    patience
                );
                return true;
            }
        }
        false
    }

    /// Advance to the next epoch, stepping the learning rate schedule
    pub fn next_epoch(&mut self, improved: bool) {
        self.state.epoch += 1;
        self.state.iteration = 0;
        self.scheduler.step(improved);
        self.state.current_lr = self.scheduler.lr();
    }

    /// Reference to the model being trained
    pub fn model(&self) -> &DefectClassifier<B> {
        &self.model
    }

    /// Consume the trainer and return the trained model
    pub fn into_model(self) -> DefectClassifier<B> {
        self.model
    }

    /// The device the trainer runs on
    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// Count correct top-1 predictions in a batch
fn batch_accuracy<B: Backend>(
    output: &Tensor<B, 2>,
    targets: &Tensor<B, 1, Int>,
) -> Result<(usize, usize)> {
    let [batch_size, _] = output.dims();
    let predictions = output.clone().argmax(1).reshape([batch_size]);
    let correct: i64 = predictions
        .equal(targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem();

    Ok((correct as usize, batch_size))
}

/// Extract per-sample predictions, probability rows, and targets from a batch
fn collect_rows<B: Backend>(
    probs: Tensor<B, 2>,
    targets: &Tensor<B, 1, Int>,
    num_classes: usize,
    all_predictions: &mut Vec<usize>,
    all_probabilities: &mut Vec<Vec<f32>>,
    all_targets: &mut Vec<usize>,
) -> Result<()> {
    let [batch_size, _] = probs.dims();

    let predictions: Vec<i64> = probs
        .clone()
        .argmax(1)
        .reshape([batch_size])
        .into_data()
        .to_vec()
        .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;

    let flat: Vec<f32> = probs
        .into_data()
        .to_vec()
        .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;

    let target_values: Vec<i64> = targets
        .clone()
        .into_data()
        .to_vec()
        .map_err(|e| DefectScanError::Inference(format!("{:?}", e)))?;

    all_predictions.extend(predictions.iter().map(|&p| p as usize));
    all_probabilities.extend(flat.chunks(num_classes).map(|row| row.to_vec()));
    all_targets.extend(target_values.iter().map(|&t| t as usize));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::model::cnn::DefectClassifierConfig;
    use burn::optim::AdamConfig;
    use rand::SeedableRng;

    fn tiny_dataset(dir: &std::path::Path, per_class: usize) -> DefectBurnDataset {
        let mut samples = Vec::new();
        for label in 0..2usize {
            for i in 0..per_class {
                let path = dir.join(format!("c{}_{}.png", label, i));
                let shade = if label == 0 { 30 } else { 220 };
                image::RgbImage::from_pixel(16, 16, image::Rgb([shade, shade, shade]))
                    .save(&path)
                    .unwrap();
                samples.push((path, label));
            }
        }
        DefectBurnDataset::new(samples, 16)
    }

    fn tiny_trainer(
        config: TrainingConfig,
    ) -> Trainer<TrainingBackend, impl Optimizer<DefectClassifier<TrainingBackend>, TrainingBackend>>
    {
        let device = Default::default();
        let model_config = DefectClassifierConfig::new()
            .with_num_classes(2)
            .with_base_filters(2)
            .with_head_units(4);
        let model = DefectClassifier::new(&model_config, &device);
        Trainer::new(model, AdamConfig::new().init(), config, device)
    }

    #[test]
    fn test_train_epoch_runs() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset(dir.path(), 4);
        let batcher = DefectBatcher::new(16);

        let mut config = TrainingConfig::debug();
        config.batch_size = 4;
        let mut trainer = tiny_trainer(config);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stats = trainer.train_epoch(&dataset, &batcher, &mut rng).unwrap();

        assert!(stats.loss.is_finite());
        assert!((0.0..=1.0).contains(&stats.accuracy));
        assert_eq!(trainer.state.iteration, 2);
        assert_eq!(trainer.state.samples_seen, 8);
        assert_eq!(trainer.state.train_loss_history.len(), 1);
    }

    #[test]
    fn test_validate_collects_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = tiny_dataset(dir.path(), 3);
        let batcher = DefectBatcher::new(16);

        let mut config = TrainingConfig::debug();
        config.batch_size = 4;
        let trainer = tiny_trainer(config);

        let stats = trainer.validate(&dataset, &batcher).unwrap();

        assert!(stats.loss.is_finite());
        assert_eq!(stats.metrics.total_samples, 6);
        assert!((0.0..=1.0).contains(&stats.accuracy));
    }

    #[test]
    fn test_update_best_tracks_both_criteria() {
        let mut trainer = tiny_trainer(TrainingConfig::debug());

        let (best, lowest) = trainer.update_best(0.5, 1.2);
        assert!(best);
        assert!(lowest);

        // Worse accuracy but lower loss
        let (best, lowest) = trainer.update_best(0.4, 1.0);
        assert!(!best);
        assert!(lowest);
        assert_eq!(trainer.state.epochs_without_improvement, 1);

        // Better accuracy, higher loss
        let (best, lowest) = trainer.update_best(0.6, 1.5);
        assert!(best);
        assert!(!lowest);
        assert_eq!(trainer.state.epochs_without_improvement, 0);
    }

    #[test]
    fn test_early_stop_respects_patience() {
        let mut config = TrainingConfig::debug();
        config.early_stopping_patience = Some(2);
        let mut trainer = tiny_trainer(config);

        trainer.update_best(0.5, 1.0);
        assert!(!trainer.should_early_stop());

        trainer.update_best(0.4, 1.1);
        assert!(!trainer.should_early_stop());

        trainer.update_best(0.4, 1.1);
        assert!(trainer.should_early_stop());
    }

    #[test]
    fn test_next_epoch_advances_state() {
        let mut trainer = tiny_trainer(TrainingConfig::debug());
        assert_eq!(trainer.state.epoch, 0);

        trainer.next_epoch(false);
        assert_eq!(trainer.state.epoch, 1);
    }
}
