//! Defect dataset loader
//!
//! Discovers labeled samples from either a label-list CSV (`img_path,label`
//! rows, the format competition organizers hand out) or a directory tree with
//! one subdirectory per class. Unlabeled test images are listed separately for
//! submission generation.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{is_image_file, label_index, label_name};
use crate::utils::error::{DefectScanError, Result};

/// A single labeled image sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index (0 = norm, k = defect k)
    pub label: usize,
    /// Unique sample ID
    pub id: usize,
}

/// Labeled defect dataset with lazy image loading
#[derive(Debug, Clone)]
pub struct DefectDataset {
    /// All samples in the dataset
    pub samples: Vec<ImageSample>,
    /// Number of classes (norm + defect types)
    pub num_classes: usize,
    /// Target square image size
    pub image_size: usize,
}

impl DefectDataset {
    /// Load samples from a headerless label-list CSV with `img_path,label`
    /// rows. Relative paths are resolved against `image_root`.
    pub fn from_label_csv<P: AsRef<Path>, Q: AsRef<Path>>(
        csv_path: P,
        image_root: Q,
        num_classes: usize,
        image_size: usize,
    ) -> Result<Self> {
        let csv_path = csv_path.as_ref();
        let image_root = image_root.as_ref();
        info!("Loading label list from {:?}", csv_path);

        if !csv_path.exists() {
            return Err(DefectScanError::PathNotFound(csv_path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(csv_path)?;

        let mut samples = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let raw_path = record.get(0).ok_or_else(|| {
                DefectScanError::Dataset(format!("row {}: missing image path", row))
            })?;
            let raw_label = record.get(1).ok_or_else(|| {
                DefectScanError::Dataset(format!("row {}: missing label", row))
            })?;

            let label: usize = raw_label.trim().parse().map_err(|_| {
                DefectScanError::Dataset(format!("row {}: invalid label '{}'", row, raw_label))
            })?;
            if label >= num_classes {
                return Err(DefectScanError::Dataset(format!(
                    "row {}: label {} out of range (num_classes = {})",
                    row, label, num_classes
                )));
            }

            let path = PathBuf::from(raw_path.trim());
            let path = if path.is_absolute() {
                path
            } else {
                image_root.join(path)
            };

            samples.push(ImageSample {
                path,
                label,
                id: row,
            });
        }

        info!("Loaded {} labeled samples from CSV", samples.len());

        Ok(Self {
            samples,
            num_classes,
            image_size,
        })
    }

    /// Load samples from a directory tree with one subdirectory per class.
    ///
    /// ```text
    /// root/
    /// ├── norm/
    /// │   ├── 0001.jpg
    /// │   └── 0002.jpg
    /// ├── defect1/
    /// │   └── ...
    /// └── defect2/
    ///     └── ...
    /// ```
    ///
    /// Directory names must follow the `norm`/`defect<k>` scheme; other
    /// directories are skipped with a warning.
    pub fn from_class_dirs<P: AsRef<Path>>(
        root: P,
        num_classes: usize,
        image_size: usize,
    ) -> Result<Self> {
        let root = root.as_ref();
        info!("Scanning class directories under {:?}", root);

        if !root.exists() {
            return Err(DefectScanError::PathNotFound(root.to_path_buf()));
        }

        let mut class_dirs: Vec<(usize, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            match label_index(&dir_name) {
                Some(label) if label < num_classes => {
                    class_dirs.push((label, entry.path()));
                }
                Some(label) => {
                    warn!(
                        "Skipping directory '{}': label {} out of range",
                        dir_name, label
                    );
                }
                None => {
                    warn!("Skipping directory '{}': not a recognized class name", dir_name);
                }
            }
        }
        class_dirs.sort_by_key(|(label, _)| *label);

        let mut samples = Vec::new();
        let mut next_id = 0usize;
        for (label, dir) in &class_dirs {
            let before = samples.len();
            for entry in WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path().to_path_buf();
                if is_image_file(&path) {
                    samples.push(ImageSample {
                        path,
                        label: *label,
                        id: next_id,
                    });
                    next_id += 1;
                }
            }
            debug!(
                "Class '{}': {} samples",
                label_name(*label),
                samples.len() - before
            );
        }

        info!(
            "Loaded {} samples across {} class directories",
            samples.len(),
            class_dirs.len()
        );

        Ok(Self {
            samples,
            num_classes,
            image_size,
        })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset has no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode an image from disk and resize it to the target size
    pub fn load_image(&self, sample: &ImageSample) -> Result<DynamicImage> {
        load_and_resize(&sample.path, self.image_size)
    }

    /// Shuffle the samples in place with a given seed
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }

    /// Statistics over the loaded samples
    pub fn stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes: self.num_classes,
            class_counts,
        }
    }
}

/// Decode an image file and resize it to a square of side `image_size`
pub fn load_and_resize(path: &Path, image_size: usize) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .map_err(|e| DefectScanError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| DefectScanError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(img.resize_exact(
        image_size as u32,
        image_size as u32,
        image::imageops::FilterType::Triangle,
    ))
}

/// List the image files of an unlabeled test directory, sorted by file name
/// so submission rows are stable across runs.
pub fn list_test_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(DefectScanError::PathNotFound(dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| is_image_file(p))
        .collect();
    paths.sort();

    info!("Found {} test images in {:?}", paths.len(), dir);
    Ok(paths)
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    /// Print statistics to the console
    pub fn print(&self) {
        println!("\nDataset statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class:");

        for (idx, count) in self.class_counts.iter().enumerate() {
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            let bar: String = "#".repeat(bar_len);
            println!("    {:3}. {:10} {:6} {}", idx, label_name(idx), count, bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_png(path: &Path) {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 40, 200]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_from_label_csv() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        write_png(&dir.path().join("b.png"));

        let csv_path = dir.path().join("train.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "a.png,0").unwrap();
        writeln!(f, "b.png,3").unwrap();

        let dataset = DefectDataset::from_label_csv(&csv_path, dir.path(), 12, 32).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.samples[0].label, 0);
        assert_eq!(dataset.samples[1].label, 3);
        assert!(dataset.samples[0].path.ends_with("a.png"));
    }

    #[test]
    fn test_from_label_csv_rejects_bad_label() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("train.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "a.png,99").unwrap();

        let result = DefectDataset::from_label_csv(&csv_path, dir.path(), 12, 32);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_class_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("norm")).unwrap();
        std::fs::create_dir(dir.path().join("defect2")).unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        write_png(&dir.path().join("norm/x.png"));
        write_png(&dir.path().join("norm/y.png"));
        write_png(&dir.path().join("defect2/z.png"));

        let dataset = DefectDataset::from_class_dirs(dir.path(), 12, 32).unwrap();
        assert_eq!(dataset.len(), 3);

        let stats = dataset.stats();
        assert_eq!(stats.class_counts[0], 2);
        assert_eq!(stats.class_counts[2], 1);
    }

    #[test]
    fn test_load_image_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        write_png(&path);

        let img = load_and_resize(&path, 16).unwrap();
        assert_eq!(img.width(), 16);
        assert_eq!(img.height(), 16);
    }

    #[test]
    fn test_list_test_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"));
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let paths = list_test_images(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.png"));
        assert!(paths[1].ends_with("b.png"));
    }

    #[test]
    fn test_missing_path() {
        let result = DefectDataset::from_class_dirs("/definitely/not/here", 12, 32);
        assert!(matches!(result, Err(DefectScanError::PathNotFound(_))));
    }
}
