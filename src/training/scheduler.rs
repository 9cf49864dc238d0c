//! Learning rate scheduling
//!
//! Steps the learning rate at epoch boundaries according to the configured
//! schedule. Plateau decay is driven by the trainer's best-accuracy tracking
//! rather than a raw metric threshold.

use std::f64::consts::PI;

use tracing::debug;

use crate::model::config::LrSchedule;

/// Stateful learning rate scheduler
#[derive(Debug, Clone)]
pub struct LrScheduler {
    schedule: LrSchedule,
    base_lr: f64,
    current_lr: f64,
    epoch: usize,
    total_epochs: usize,
    stalled_epochs: usize,
}

impl LrScheduler {
    /// Create a scheduler for a run of `total_epochs` epochs
    pub fn new(schedule: LrSchedule, base_lr: f64, total_epochs: usize) -> Self {
        Self {
            schedule,
            base_lr,
            current_lr: base_lr,
            epoch: 0,
            total_epochs,
            stalled_epochs: 0,
        }
    }

    /// The learning rate for the current epoch
    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// Advance one epoch. `improved` reports whether validation accuracy
    /// improved this epoch; only the plateau schedule uses it.
    pub fn step(&mut self, improved: bool) {
        self.epoch += 1;

        let previous = self.current_lr;
        match self.schedule {
            LrSchedule::Constant => {}

            LrSchedule::Step { interval, divisor } => {
                if self.epoch % interval == 0 {
                    self.current_lr /= divisor;
                }
            }

            LrSchedule::Plateau { patience, divisor } => {
                if improved {
                    self.stalled_epochs = 0;
                } else {
                    self.stalled_epochs += 1;
                    if self.stalled_epochs >= patience {
                        self.current_lr /= divisor;
                        self.stalled_epochs = 0;
                    }
                }
            }

            LrSchedule::Cosine { min_lr } => {
                let progress = (self.epoch as f64 / self.total_epochs.max(1) as f64).min(1.0);
                self.current_lr =
                    min_lr + (self.base_lr - min_lr) * (1.0 + (progress * PI).cos()) / 2.0;
            }
        }

        if (self.current_lr - previous).abs() > f64::EPSILON {
            debug!(
                "Learning rate: {:.6} -> {:.6} (epoch {})",
                previous, self.current_lr, self.epoch
            );
        }
    }

    /// Current epoch counter
    pub fn epoch(&self) -> usize {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let mut scheduler = LrScheduler::new(LrSchedule::Constant, 1e-3, 10);
        scheduler.step(false);
        scheduler.step(false);
        assert_eq!(scheduler.lr(), 1e-3);
    }

    #[test]
    fn test_step_decay() {
        let mut scheduler = LrScheduler::new(
            LrSchedule::Step {
                interval: 2,
                divisor: 10.0,
            },
            1e-3,
            10,
        );

        scheduler.step(false); // epoch 1
        assert!((scheduler.lr() - 1e-3).abs() < 1e-12);

        scheduler.step(false); // epoch 2
        assert!((scheduler.lr() - 1e-4).abs() < 1e-12);

        scheduler.step(false); // epoch 3
        assert!((scheduler.lr() - 1e-4).abs() < 1e-12);

        scheduler.step(false); // epoch 4
        assert!((scheduler.lr() - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_decay() {
        let mut scheduler = LrScheduler::new(
            LrSchedule::Plateau {
                patience: 2,
                divisor: 5.0,
            },
            1e-3,
            20,
        );

        scheduler.step(true);
        assert!((scheduler.lr() - 1e-3).abs() < 1e-12);

        scheduler.step(false);
        assert!((scheduler.lr() - 1e-3).abs() < 1e-12);

        scheduler.step(false); // second stalled epoch triggers decay
        assert!((scheduler.lr() - 2e-4).abs() < 1e-12);

        // Improvement resets the stall counter
        scheduler.step(true);
        scheduler.step(false);
        assert!((scheduler.lr() - 2e-4).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_reaches_min() {
        let mut scheduler = LrScheduler::new(LrSchedule::Cosine { min_lr: 1e-5 }, 1e-3, 10);

        for _ in 0..5 {
            scheduler.step(false);
        }
        let midway = scheduler.lr();
        assert!(midway < 1e-3 && midway > 1e-5);

        for _ in 0..5 {
            scheduler.step(false);
        }
        assert!((scheduler.lr() - 1e-5).abs() < 1e-9);
    }
}
