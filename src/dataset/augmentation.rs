//! Training-time data augmentation
//!
//! Keeps to transforms that preserve defect appearance on inspection imagery:
//! horizontal flips and rotation by a fixed set of right angles, both exact
//! pixel permutations with no resampling.

use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Right-angle rotations applied during augmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Apply the rotation to an image
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Rotation::None => img,
            Rotation::Deg90 => img.rotate90(),
            Rotation::Deg180 => img.rotate180(),
            Rotation::Deg270 => img.rotate270(),
        }
    }
}

/// Augmenter choosing one rotation from a fixed set plus an optional
/// horizontal flip, driven by the caller's RNG for reproducibility.
#[derive(Debug, Clone)]
pub struct Augmenter {
    /// Candidate rotations; one is picked uniformly per image
    pub rotations: Vec<Rotation>,
    /// Probability of a horizontal flip
    pub flip_probability: f64,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            rotations: vec![
                Rotation::None,
                Rotation::Deg90,
                Rotation::Deg180,
                Rotation::Deg270,
            ],
            flip_probability: 0.5,
        }
    }
}

impl Augmenter {
    /// Create an augmenter with the default rotation set
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the candidate rotations
    pub fn with_rotations(mut self, rotations: Vec<Rotation>) -> Self {
        self.rotations = rotations;
        self
    }

    /// Set the horizontal flip probability
    pub fn with_flip_probability(mut self, p: f64) -> Self {
        self.flip_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Apply a randomly chosen transform to the image
    pub fn apply<R: Rng>(&self, img: DynamicImage, rng: &mut R) -> DynamicImage {
        let img = if !self.rotations.is_empty() {
            let idx = rng.gen_range(0..self.rotations.len());
            self.rotations[idx].apply(img)
        } else {
            img
        };

        if self.flip_probability > 0.0 && rng.gen_bool(self.flip_probability) {
            img.fliph()
        } else {
            img
        }
    }
}
