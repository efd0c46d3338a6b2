//! Minstrel CLI - experiment runner for instrument classification
//!
//! This CLI provides a `minstrel` command for running the experiment
//! pipeline: feature extraction, training, model selection, prediction,
//! and analysis over leave-one-corpus-out cross-validation folds.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minstrel_core::{Config, Corpus};
use minstrel_training::{default_factory, DatasetSource, Driver};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Minstrel - instrument-classification experiment runner
#[derive(Parser, Debug)]
#[command(
    name = "minstrel",
    author,
    version,
    about = "Minstrel - instrument-classification experiment runner",
    long_about = "Runs instrument-classification experiments over multiple audio corpora:\n\
                  feature extraction, bounded training, checkpoint search, prediction,\n\
                  and per-fold analysis."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Path to the experiment config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Experiment name (directory under the configured model dir)
    #[arg(short, long, default_value = "default", global = true)]
    experiment: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract features for every observation in the selected dataset
    Extract,

    /// Train a model for one held-out fold
    Train {
        /// Held-out corpus (rwc, uiowa, philharmonia)
        fold: String,
    },

    /// Search trained checkpoints for the best model on validation data
    Select {
        /// Held-out corpus (rwc, uiowa, philharmonia)
        fold: String,
    },

    /// Predict over the whole dataset with a selected checkpoint
    Predict {
        /// Held-out corpus (rwc, uiowa, philharmonia)
        fold: String,

        /// Checkpoint iteration (defaults to the selected best)
        #[arg(long)]
        iteration: Option<u64>,
    },

    /// Score persisted predictions against the held-out corpus
    Analyze {
        /// Held-out corpus (rwc, uiowa, philharmonia)
        fold: String,

        /// Checkpoint iteration (defaults to the selected best)
        #[arg(long)]
        iteration: Option<u64>,
    },

    /// Run the full pipeline across all cross-validation folds
    Cv,

    /// Print observation counts by corpus and instrument
    Stats,

    /// Validate the dataset index (schema and file existence)
    Validate,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level: Level = args
        .log_level
        .parse()
        .with_context(|| format!("invalid log level {:?}", args.log_level))?;
    FmtSubscriber::builder().with_max_level(level).init();

    let config = Config::load(&args.config)
        .with_context(|| format!("cannot load config {}", args.config.display()))?;

    let mut driver = Driver::new(config, args.experiment.clone(), default_factory())?;

    let stop = driver.stop_flag();
    ctrlc::set_handler(move || {
        warn!("interrupt received; finishing the current iteration");
        stop.store(true, Ordering::Relaxed);
    })
    .context("cannot install interrupt handler")?;

    run_command(&mut driver, args.command)
}

fn parse_fold(fold: &str) -> anyhow::Result<Corpus> {
    fold.parse()
        .with_context(|| format!("invalid fold {fold:?}; expected rwc, uiowa, or philharmonia"))
}

fn run_command(driver: &mut Driver, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Extract => {
            driver.load_dataset(DatasetSource::Default, false)?;
            if !driver.extract_features()? {
                bail!("feature extraction did not complete for every observation");
            }
        }
        Command::Train { fold } => {
            driver.load_dataset(DatasetSource::Default, true)?;
            driver.setup_partitions(parse_fold(&fold)?)?;
            if !driver.train_model()? {
                bail!("training did not produce a loss artifact");
            }
        }
        Command::Select { fold } => {
            driver.load_dataset(DatasetSource::Default, true)?;
            driver.setup_partitions(parse_fold(&fold)?)?;
            let rows = driver.find_best_model()?;
            let best = driver.select_best_iteration(&rows)?;
            info!(best_iteration = best, "model selection complete");
        }
        Command::Predict { fold, iteration } => {
            driver.load_dataset(DatasetSource::Default, true)?;
            driver.setup_partitions(parse_fold(&fold)?)?;
            let iteration = match iteration {
                Some(i) => i,
                None => {
                    let rows = driver.find_best_model()?;
                    driver.select_best_iteration(&rows)?
                }
            };
            let rows = driver.predict(iteration)?;
            info!(predictions = rows.len(), iteration, "prediction complete");
        }
        Command::Analyze { fold, iteration } => {
            driver.load_dataset(DatasetSource::Default, true)?;
            driver.setup_partitions(parse_fold(&fold)?)?;
            let iteration = match iteration {
                Some(i) => i,
                None => {
                    let rows = driver.find_best_model()?;
                    driver.select_best_iteration(&rows)?
                }
            };
            if !driver.analyze_from_predictions(iteration)? {
                bail!("analysis artifact was not written");
            }
        }
        Command::Cv => {
            driver.load_dataset(DatasetSource::Default, true)?;
            if !driver.fit_and_predict_cross_validation()? {
                bail!("one or more cross-validation folds failed");
            }
        }
        Command::Stats => {
            driver.load_dataset(DatasetSource::Default, false)?;
            let stats = driver.dataset_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Validate => {
            driver.load_dataset(DatasetSource::Default, false)?;
            if !driver.validate_data()? {
                bail!("dataset validation failed");
            }
            info!("dataset is valid");
        }
    }
    Ok(())
}
