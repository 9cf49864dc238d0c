//! End-to-end training pipeline
//!
//! Wires the pieces together: split the labeled pool, build datasets and the
//! batcher, then run the epoch loop with validation, checkpointing, learning
//! rate scheduling, and early stopping.

use std::path::Path;

use burn::config::Config;
use burn::optim::{decay::WeightDecayConfig, AdamConfig};
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::checkpoint::CheckpointManager;
use super::trainer::Trainer;
use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::{DefectBatcher, DefectBurnDataset};
use crate::dataset::loader::DefectDataset;
use crate::dataset::split::{SplitConfig, TrainValSplit};
use crate::model::cnn::{DefectClassifier, DefectClassifierConfig};
use crate::model::config::TrainingConfig;
use crate::utils::error::{DefectScanError, Result};

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Best validation accuracy reached
    pub best_accuracy: f64,
    /// Lowest validation loss reached
    pub lowest_loss: f64,
    /// Number of epochs actually run (may be fewer with early stopping)
    pub epochs_run: usize,
    /// Training samples per epoch
    pub train_samples: usize,
    /// Validation samples
    pub val_samples: usize,
}

/// Run training over a loaded dataset, writing artifacts into `output_dir`.
pub fn run_training<B: AutodiffBackend>(
    dataset: DefectDataset,
    config: TrainingConfig,
    output_dir: &Path,
) -> Result<TrainingSummary> {
    config.validate()?;

    if dataset.is_empty() {
        return Err(DefectScanError::Dataset(
            "no images found in the dataset".to_string(),
        ));
    }

    let device = B::Device::default();
    info!("Training on {} samples ({:?})", dataset.len(), device);

    std::fs::create_dir_all(output_dir)?;
    config.save(&output_dir.join("config.json"))?;

    // Split the labeled pool
    let split = TrainValSplit::from_samples(
        dataset.samples.clone(),
        SplitConfig {
            val_fraction: config.val_fraction,
            seed: config.seed,
            stratified: true,
        },
    )?;
    info!(
        "Split: {} train / {} validation",
        split.train.len(),
        split.validation.len()
    );

    if split.train.len() < config.batch_size {
        return Err(DefectScanError::Config(format!(
            "not enough training samples ({}) for batch size {}",
            split.train.len(),
            config.batch_size
        )));
    }

    // Training set stays lazy so augmentation can vary per item; the
    // validation set is revisited every epoch, so decode it once.
    let mut train_dataset = DefectBurnDataset::new(split.train_pairs(), config.image_size);
    if config.augment {
        train_dataset = train_dataset.with_augmentation(Augmenter::new(), config.seed);
    }
    let val_dataset =
        DefectBurnDataset::new(split.validation_pairs(), config.image_size).with_cache()?;

    let batcher = DefectBatcher::new(config.image_size);

    // Model and optimizer
    let model_config = DefectClassifierConfig::new()
        .with_num_classes(dataset.num_classes)
        .with_input_size(config.image_size);
    model_config
        .save(output_dir.join("model.json"))
        .map_err(|e| DefectScanError::Serialization(e.to_string()))?;
    let model = DefectClassifier::<B>::new(&model_config, &device);

    let optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init();

    let epochs = config.epochs;
    let checkpoint_interval = config.checkpoint_interval;
    let mut trainer = Trainer::new(model, optimizer, config.clone(), device);
    let manager = CheckpointManager::new(output_dir);

    let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut epochs_run = 0;

    for epoch in 0..epochs {
        let train_stats = trainer.train_epoch(&train_dataset, &batcher, &mut epoch_rng)?;
        let val_stats = trainer.validate(&val_dataset, &batcher)?;
        epochs_run = epoch + 1;

        let (is_best, is_lowest_loss) = trainer.update_best(val_stats.accuracy, val_stats.loss);

        info!(
            "Epoch {}/{} | train loss {:.4} acc {:.2}% | val loss {:.4} acc {:.2}% top5 {:.2}%{}",
            epoch + 1,
            epochs,
            train_stats.loss,
            train_stats.accuracy * 100.0,
            val_stats.loss,
            val_stats.accuracy * 100.0,
            val_stats.metrics.top5_accuracy * 100.0,
            if is_best { " (best)" } else { "" }
        );

        let periodic = checkpoint_interval > 0 && (epoch + 1) % checkpoint_interval == 0;
        if is_best || is_lowest_loss || periodic {
            manager.save(
                trainer.model().clone(),
                &trainer.state,
                is_best,
                is_lowest_loss,
            )?;
        }

        if trainer.should_early_stop() {
            break;
        }

        trainer.next_epoch(is_best);
    }

    let summary = TrainingSummary {
        best_accuracy: trainer.state.best_accuracy,
        lowest_loss: trainer.state.lowest_loss,
        epochs_run,
        train_samples: split.train.len(),
        val_samples: split.validation.len(),
    };

    info!(
        "Training complete: {} epochs, best val acc {:.2}%, lowest val loss {:.4}",
        summary.epochs_run,
        summary.best_accuracy * 100.0,
        summary.lowest_loss
    );

    Ok(summary)
}
