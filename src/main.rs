//! defectscan CLI
//!
//! Command-line entry point for the surface defect classification pipeline:
//! training, evaluation, ad-hoc inference, and submission generation.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use defectscan::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use defectscan::dataset::loader::{list_test_images, DefectDataset};
use defectscan::dataset::split::{SplitConfig, TrainValSplit};
use defectscan::inference::predictor::Predictor;
use defectscan::inference::submission::{
    class_counts, predict_test_dir, write_probabilities, write_submission,
};
use defectscan::model::cnn::DefectClassifierConfig;
use defectscan::model::config::{LrSchedule, TrainingConfig};
use defectscan::training::run::run_training;
use defectscan::utils::logging::{init_logging, LogConfig};
use defectscan::utils::metrics::Metrics;
use defectscan::{dataset, IMAGE_SIZE, NUM_CLASSES};

/// Surface defect classification with Burn
///
/// Trains a CNN on labeled inspection images (one `norm` class plus N defect
/// classes), evaluates checkpoints, and produces submission files of
/// per-image predicted labels.
#[derive(Parser, Debug)]
#[command(name = "defectscan")]
#[command(version)]
#[command(about = "Surface defect classification: train, evaluate, submit", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the labeled images come from
#[derive(clap::Args, Debug, Clone)]
struct DataArgs {
    /// Label-list CSV with `img_path,label` rows (no header)
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Root directory for relative paths in the label list
    #[arg(long, default_value = "data/images")]
    image_root: PathBuf,

    /// Directory tree with one subdirectory per class (norm/, defect1/, ...)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of classes (norm + defect types)
    #[arg(long, default_value_t = NUM_CLASSES)]
    num_classes: usize,

    /// Input image size
    #[arg(long, default_value_t = IMAGE_SIZE)]
    image_size: usize,
}

impl DataArgs {
    fn load(&self) -> Result<DefectDataset> {
        match (&self.labels, &self.data_dir) {
            (Some(csv), _) => DefectDataset::from_label_csv(
                csv,
                &self.image_root,
                self.num_classes,
                self.image_size,
            )
            .context("failed to load label list"),
            (None, Some(dir)) => {
                DefectDataset::from_class_dirs(dir, self.num_classes, self.image_size)
                    .context("failed to scan class directories")
            }
            (None, None) => Err(anyhow!(
                "provide a dataset with --labels <csv> or --data-dir <dir>"
            )),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the defect classifier
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Number of training epochs
        #[arg(short, long, default_value = "50")]
        epochs: usize,

        /// Batch size for training and validation
        #[arg(short, long, default_value = "64")]
        batch_size: usize,

        /// Initial learning rate
        #[arg(short, long, default_value = "0.0001")]
        learning_rate: f64,

        /// Weight decay (L2 regularization)
        #[arg(long, default_value = "0.0001")]
        weight_decay: f64,

        /// Divide the learning rate by this factor on validation plateaus
        #[arg(long, default_value = "5.0")]
        lr_decay: f64,

        /// Epochs without improvement before the learning rate decays
        #[arg(long, default_value = "3")]
        lr_patience: usize,

        /// Fraction of labeled data held out for validation
        #[arg(long, default_value = "0.1")]
        val_fraction: f64,

        /// Random seed for splitting and shuffling
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory for checkpoints
        #[arg(short, long, default_value = "output/models")]
        output_dir: PathBuf,

        /// Enable flip/rotation augmentation on training images
        #[arg(long, default_value = "false")]
        augment: bool,

        /// Disable early stopping
        #[arg(long, default_value = "false")]
        no_early_stop: bool,

        /// Early stopping patience in epochs
        #[arg(long, default_value = "10")]
        patience: usize,

        /// Log a progress line every N batches
        #[arg(long, default_value = "10")]
        print_freq: usize,

        /// Save a checkpoint every N epochs
        #[arg(long, default_value = "1")]
        checkpoint_interval: usize,
    },

    /// Evaluate a checkpoint on the validation split
    Eval {
        #[command(flatten)]
        data: DataArgs,

        /// Path to a model record, without extension (e.g. output/run/model_best)
        #[arg(short, long)]
        model: PathBuf,

        /// Validation fraction (must match training for a faithful split)
        #[arg(long, default_value = "0.1")]
        val_fraction: f64,

        /// Split seed (must match training)
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Batch size for inference
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Classify a single image or a directory of images
    Infer {
        /// Path to an image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Path to a model record, without extension
        #[arg(short, long)]
        model: PathBuf,

        /// Flag predictions below this confidence
        #[arg(long, default_value = "0.9")]
        threshold: f32,
    },

    /// Produce a submission file for an unlabeled test directory
    Submit {
        /// Directory of test images
        #[arg(short, long)]
        test_dir: PathBuf,

        /// Path to a model record, without extension
        #[arg(short, long)]
        model: PathBuf,

        /// Output CSV path
        #[arg(short, long, default_value = "result/submission.csv")]
        output: PathBuf,

        /// Also write softmax probabilities to this CSV
        #[arg(long)]
        probabilities: Option<PathBuf>,

        /// Batch size for inference
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Show dataset statistics
    Stats {
        #[command(flatten)]
        data: DataArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            data,
            epochs,
            batch_size,
            learning_rate,
            weight_decay,
            lr_decay,
            lr_patience,
            val_fraction,
            seed,
            output_dir,
            augment,
            no_early_stop,
            patience,
            print_freq,
            checkpoint_interval,
        } => {
            let config = TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                weight_decay,
                lr_schedule: LrSchedule::Plateau {
                    patience: lr_patience,
                    divisor: lr_decay,
                },
                val_fraction,
                seed,
                augment,
                print_freq,
                checkpoint_interval,
                image_size: data.image_size,
                early_stopping_patience: if no_early_stop { None } else { Some(patience) },
            };
            cmd_train(&data, config, &output_dir)?;
        }

        Commands::Eval {
            data,
            model,
            val_fraction,
            seed,
            batch_size,
        } => {
            cmd_eval(&data, &model, val_fraction, seed, batch_size)?;
        }

        Commands::Infer {
            input,
            model,
            threshold,
        } => {
            cmd_infer(&input, &model, threshold)?;
        }

        Commands::Submit {
            test_dir,
            model,
            output,
            probabilities,
            batch_size,
        } => {
            cmd_submit(&test_dir, &model, &output, probabilities.as_deref(), batch_size)?;
        }

        Commands::Stats { data } => {
            cmd_stats(&data)?;
        }
    }

    Ok(())
}

fn cmd_train(data: &DataArgs, config: TrainingConfig, output_dir: &Path) -> Result<()> {
    println!("{}", "Initializing training...".green().bold());
    println!("  Backend: {}", backend_name());

    let dataset = data.load()?;
    dataset.stats().print();

    // Each run gets its own timestamped directory
    let run_dir = output_dir.join(format!("run_{}", Local::now().format("%Y%m%d_%H%M%S")));
    println!("  Artifacts: {:?}", run_dir);
    println!();

    let summary = run_training::<TrainingBackend>(dataset, config, &run_dir)?;

    println!();
    println!("{}", "Training complete!".green().bold());
    println!(
        "  Best validation accuracy: {:.2}%",
        summary.best_accuracy * 100.0
    );
    println!("  Lowest validation loss:   {:.4}", summary.lowest_loss);
    println!("  Epochs run:               {}", summary.epochs_run);
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  defectscan submit --test-dir data/test --model {:?}",
        run_dir.join("model_best")
    );

    Ok(())
}

/// Load the model configuration saved next to a record file
fn load_model_config(model_path: &Path) -> Result<DefectClassifierConfig> {
    let config_path = model_path
        .parent()
        .map(|dir| dir.join("model.json"))
        .filter(|p| p.exists())
        .ok_or_else(|| {
            anyhow!(
                "model.json not found next to {:?}; was this directory produced by `defectscan train`?",
                model_path
            )
        })?;

    DefectClassifierConfig::load(&config_path)
        .map_err(|e| anyhow!("failed to load {:?}: {}", config_path, e))
}

fn cmd_eval(
    data: &DataArgs,
    model_path: &Path,
    val_fraction: f64,
    seed: u64,
    batch_size: usize,
) -> Result<()> {
    println!("{}", "Evaluating model...".cyan().bold());
    println!("  Model:   {:?}", model_path);
    println!("  Backend: {}", backend_name());

    let dataset = data.load()?;
    let split = TrainValSplit::from_samples(
        dataset.samples.clone(),
        SplitConfig {
            val_fraction,
            seed,
            stratified: true,
        },
    )?;
    println!("  Validation samples: {}", split.validation.len());
    println!();

    let model_config = load_model_config(model_path)?;
    let predictor: Predictor<DefaultBackend> =
        Predictor::from_record(&model_config, model_path, default_device())?;

    let paths: Vec<PathBuf> = split.validation.iter().map(|s| s.path.clone()).collect();
    let targets: Vec<usize> = split.validation.iter().map(|s| s.label).collect();

    let results = predictor.predict_paths(&paths, batch_size)?;
    let predictions: Vec<usize> = results.iter().map(|r| r.predicted_class).collect();
    let probabilities: Vec<Vec<f32>> =
        results.iter().map(|r| r.probabilities.clone()).collect();

    let metrics = Metrics::from_predictions_with_probs(
        &predictions,
        &probabilities,
        &targets,
        dataset.num_classes,
    );

    println!("{}", "Results:".green().bold());
    println!("  {}", metrics.summary());
    println!();
    println!("  Per-class:");
    for class in &metrics.per_class {
        if class.support == 0 {
            continue;
        }
        println!(
            "    {:10} precision {:.3} | recall {:.3} | f1 {:.3} | support {}",
            dataset::label_name(class.class_idx),
            class.precision,
            class.recall,
            class.f1,
            class.support
        );
    }

    if let Some(cm) = &metrics.confusion_matrix {
        let names: Vec<String> = (0..dataset.num_classes).map(dataset::label_name).collect();
        println!("{}", cm.render(Some(&names)));
    }

    Ok(())
}

fn cmd_infer(input: &Path, model_path: &Path, threshold: f32) -> Result<()> {
    println!("{}", "Running inference...".cyan().bold());
    println!("  Input:   {:?}", input);
    println!("  Model:   {:?}", model_path);
    println!("  Backend: {}", backend_name());
    println!();

    let model_config = load_model_config(model_path)?;
    let predictor: Predictor<DefaultBackend> =
        Predictor::from_record(&model_config, model_path, default_device())?;

    let files: Vec<PathBuf> = if input.is_dir() {
        list_test_images(input)?
    } else {
        vec![input.to_path_buf()]
    };

    if files.is_empty() {
        return Err(anyhow!("no images found at {:?}", input));
    }

    for path in &files {
        let result = predictor.predict_path(path)?;

        let verdict = if result.predicted_class == 0 {
            result.label.green()
        } else {
            result.label.red()
        };
        let flag = if result.is_high_confidence(threshold) {
            String::new()
        } else {
            format!(" {}", "(low confidence)".yellow())
        };

        println!(
            "{:40} {} {:.1}%{}",
            path.file_name().unwrap_or_default().to_string_lossy(),
            verdict,
            result.confidence * 100.0,
            flag
        );
        for (idx, name, prob) in result.top_k.iter().skip(1).take(2) {
            println!("    {:38} {} {:.1}%", "", format!("{} (class {})", name, idx), prob * 100.0);
        }
    }

    Ok(())
}

fn cmd_submit(
    test_dir: &Path,
    model_path: &Path,
    output: &Path,
    probabilities: Option<&Path>,
    batch_size: usize,
) -> Result<()> {
    println!("{}", "Generating submission...".cyan().bold());
    println!("  Test dir: {:?}", test_dir);
    println!("  Model:    {:?}", model_path);
    println!("  Output:   {:?}", output);
    println!("  Backend:  {}", backend_name());
    println!();

    let model_config = load_model_config(model_path)?;
    let predictor: Predictor<DefaultBackend> =
        Predictor::from_record(&model_config, model_path, default_device())?;

    let rows = predict_test_dir(
        predictor.model(),
        &default_device(),
        test_dir,
        model_config.input_size,
        batch_size,
    )?;

    write_submission(&rows, output)?;
    if let Some(probs_path) = probabilities {
        write_probabilities(&rows, probs_path)?;
    }

    println!("{}", "Predicted label distribution:".cyan().bold());
    for (idx, count) in class_counts(&rows, model_config.num_classes)
        .iter()
        .enumerate()
    {
        if *count > 0 {
            println!("  {:10} {}", dataset::label_name(idx), count);
        }
    }

    println!();
    println!(
        "{} {} rows written to {:?}",
        "Done:".green().bold(),
        rows.len(),
        output
    );
    info!("Submission complete");

    Ok(())
}

fn cmd_stats(data: &DataArgs) -> Result<()> {
    let dataset = data.load()?;

    if dataset.is_empty() {
        println!("{} No images found.", "Warning:".yellow());
        println!();
        println!("Expected either:");
        println!("  --labels train.csv --image-root data/images");
        println!("  --data-dir data/train   (with norm/, defect1/, ... subdirectories)");
        return Ok(());
    }

    dataset.stats().print();
    Ok(())
}
