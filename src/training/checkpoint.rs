//! Model checkpointing
//!
//! The training loop keeps three weight artifacts in the output directory:
//! the latest checkpoint, a copy taken whenever validation accuracy improves
//! (`model_best`), and a copy taken whenever validation loss reaches a new
//! minimum (`lowest_loss`). A JSON sidecar records the training state that
//! produced each artifact.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use tracing::info;

use super::trainer::TrainingState;
use crate::utils::error::{DefectScanError, Result};

/// File stem of the latest checkpoint
const LATEST_STEM: &str = "checkpoint";
/// File stem of the best-accuracy copy
const BEST_STEM: &str = "model_best";
/// File stem of the lowest-loss copy
const LOWEST_LOSS_STEM: &str = "lowest_loss";
/// Extension appended by the compact recorder
const RECORD_EXT: &str = "mpk";

/// Which checkpoint artifact to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    Latest,
    Best,
    LowestLoss,
}

impl CheckpointKind {
    fn stem(self) -> &'static str {
        match self {
            CheckpointKind::Latest => LATEST_STEM,
            CheckpointKind::Best => BEST_STEM,
            CheckpointKind::LowestLoss => LOWEST_LOSS_STEM,
        }
    }
}

/// Manages the checkpoint artifacts of one training run
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager rooted at the given directory
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path passed to Burn recorders (extension is appended by the recorder)
    pub fn record_path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(kind.stem())
    }

    fn record_file(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(format!("{}.{}", kind.stem(), RECORD_EXT))
    }

    fn state_file(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.stem()))
    }

    /// Save the latest checkpoint and copy it to the best/lowest-loss slots
    /// as flagged. The copies are byte-identical to the latest artifact.
    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: M,
        state: &TrainingState,
        is_best: bool,
        is_lowest_loss: bool,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let recorder = CompactRecorder::new();
        model
            .save_file(self.record_path(CheckpointKind::Latest), &recorder)
            .map_err(|e| DefectScanError::Model(format!("failed to save checkpoint: {:?}", e)))?;
        self.write_state(state, CheckpointKind::Latest)?;

        if is_best {
            fs::copy(
                self.record_file(CheckpointKind::Latest),
                self.record_file(CheckpointKind::Best),
            )?;
            self.write_state(state, CheckpointKind::Best)?;
            info!(
                "New best model saved (epoch {}, val acc {:.2}%)",
                state.epoch + 1,
                state.best_accuracy * 100.0
            );
        }

        if is_lowest_loss {
            fs::copy(
                self.record_file(CheckpointKind::Latest),
                self.record_file(CheckpointKind::LowestLoss),
            )?;
            self.write_state(state, CheckpointKind::LowestLoss)?;
            info!(
                "Lowest-loss model saved (epoch {}, val loss {:.4})",
                state.epoch + 1,
                state.lowest_loss
            );
        }

        Ok(())
    }

    fn write_state(&self, state: &TrainingState, kind: CheckpointKind) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| DefectScanError::Serialization(e.to_string()))?;
        fs::write(self.state_file(kind), json)?;
        Ok(())
    }

    /// Load the training state sidecar of an artifact
    pub fn load_state(&self, kind: CheckpointKind) -> Result<TrainingState> {
        let path = self.state_file(kind);
        if !path.exists() {
            return Err(DefectScanError::PathNotFound(path));
        }
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| DefectScanError::Serialization(e.to_string()))
    }

    /// Load model weights from an artifact into an initialized module
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model: M,
        kind: CheckpointKind,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.record_path(kind);
        let recorder = CompactRecorder::new();
        model
            .load_file(path, &recorder, device)
            .map_err(|e| DefectScanError::Model(format!("failed to load checkpoint: {:?}", e)))
    }

    /// Whether an artifact exists on disk
    pub fn exists(&self, kind: CheckpointKind) -> bool {
        self.record_file(kind).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cnn::{DefectClassifier, DefectClassifierConfig};

    type TestBackend = burn::backend::NdArray;

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> DefectClassifier<TestBackend> {
        let config = DefectClassifierConfig::new()
            .with_num_classes(3)
            .with_base_filters(2)
            .with_head_units(4);
        DefectClassifier::new(&config, device)
    }

    #[test]
    fn test_save_creates_latest_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let device = Default::default();

        let state = TrainingState::new(1e-3);
        manager
            .save(tiny_model(&device), &state, false, false)
            .unwrap();

        assert!(manager.exists(CheckpointKind::Latest));
        assert!(!manager.exists(CheckpointKind::Best));
        assert!(!manager.exists(CheckpointKind::LowestLoss));
    }

    #[test]
    fn test_best_copy_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let device = Default::default();

        let mut state = TrainingState::new(1e-3);
        state.best_accuracy = 0.9;
        manager
            .save(tiny_model(&device), &state, true, true)
            .unwrap();

        let latest = std::fs::read(manager.record_file(CheckpointKind::Latest)).unwrap();
        let best = std::fs::read(manager.record_file(CheckpointKind::Best)).unwrap();
        let lowest = std::fs::read(manager.record_file(CheckpointKind::LowestLoss)).unwrap();
        assert_eq!(latest, best);
        assert_eq!(latest, lowest);
    }

    #[test]
    fn test_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let device = Default::default();

        let mut state = TrainingState::new(5e-4);
        state.epoch = 3;
        state.best_accuracy = 0.75;
        state.lowest_loss = 0.42;
        manager
            .save(tiny_model(&device), &state, true, false)
            .unwrap();

        let loaded = manager.load_state(CheckpointKind::Best).unwrap();
        assert_eq!(loaded.epoch, 3);
        assert!((loaded.best_accuracy - 0.75).abs() < 1e-12);
        assert!((loaded.lowest_loss - 0.42).abs() < 1e-12);
    }

    #[test]
    fn test_load_model_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let device = Default::default();

        let model = tiny_model(&device);
        let state = TrainingState::new(1e-3);
        manager.save(model.clone(), &state, false, false).unwrap();

        let loaded = manager
            .load_model(tiny_model(&device), CheckpointKind::Latest, &device)
            .unwrap();

        // Loaded weights must reproduce the saved model's outputs
        let input = burn::tensor::Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        for (e, a) in expected.iter().zip(actual.iter()) {
            assert!((e - a).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_state_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        assert!(manager.load_state(CheckpointKind::Best).is_err());
    }
}
