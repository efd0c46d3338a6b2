//! Filesystem layout for one experiment fold.
//!
//! All artifacts live under `{model_dir}/{experiment}/{fold}/`:
//! checkpoints in a params subdirectory (zero-padded by iteration),
//! loss tables, predictions, analysis, and the fold-state record.

use crate::error::Result;
use minstrel_core::config::{format_template, ExperimentConfig};
use std::path::{Path, PathBuf};

/// A discovered checkpoint file, ordered by training iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    pub iteration: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExperimentLayout {
    experiment_dir: PathBuf,
    fold_dir: PathBuf,
    params_dir: PathBuf,
    /// Zero-pad width for iteration numbers: `ceil(log10(max_iterations))`.
    pad_width: usize,
    names: ExperimentConfig,
}

impl ExperimentLayout {
    #[must_use]
    pub fn new(
        model_dir: &Path,
        experiment_name: &str,
        fold: &str,
        names: ExperimentConfig,
        max_iterations: u64,
    ) -> Self {
        let experiment_dir = model_dir.join(experiment_name);
        let fold_dir = experiment_dir.join(fold);
        let params_dir = fold_dir.join(&names.params_dir);
        let pad_width = ((max_iterations as f64).log10().ceil() as usize).max(1);
        Self { experiment_dir, fold_dir, params_dir, pad_width, names }
    }

    #[must_use]
    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    #[must_use]
    pub fn fold_dir(&self) -> &Path {
        &self.fold_dir
    }

    #[must_use]
    pub fn params_dir(&self) -> &Path {
        &self.params_dir
    }

    /// Config snapshot written at train time, shared across folds.
    #[must_use]
    pub fn config_snapshot_path(&self) -> PathBuf {
        self.experiment_dir.join(&self.names.config_path)
    }

    /// Checkpoint path for one training iteration.
    #[must_use]
    pub fn params_path(&self, iteration: u64) -> PathBuf {
        self.params_dir.join(format!(
            "{}{:0width$}.json",
            self.names.params_prefix,
            iteration,
            width = self.pad_width
        ))
    }

    /// Canonical copy of the selected best checkpoint.
    #[must_use]
    pub fn best_params_path(&self) -> PathBuf {
        self.params_dir.join(&self.names.best_params)
    }

    #[must_use]
    pub fn training_loss_path(&self) -> PathBuf {
        self.fold_dir.join(&self.names.training_loss)
    }

    #[must_use]
    pub fn validation_loss_path(&self) -> PathBuf {
        self.fold_dir.join(&self.names.validation_loss)
    }

    #[must_use]
    pub fn predictions_path(&self, iteration: u64) -> PathBuf {
        self.fold_dir
            .join(format_template(&self.names.predictions_format, &iteration.to_string()))
    }

    #[must_use]
    pub fn analysis_path(&self, iteration: u64) -> PathBuf {
        self.fold_dir
            .join(format_template(&self.names.analysis_format, &iteration.to_string()))
    }

    /// Persisted stage record for this fold.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.fold_dir.join("fold_state.json")
    }

    /// Snapshot of one partition's observation set for this fold.
    #[must_use]
    pub fn split_path(&self, partition: &str) -> PathBuf {
        self.fold_dir
            .join(format_template(&self.names.data_split_format, partition))
    }

    pub fn ensure_fold_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.fold_dir)?;
        std::fs::create_dir_all(&self.params_dir)?;
        Ok(())
    }

    /// Parse the iteration number out of a checkpoint filename produced by
    /// [`params_path`](Self::params_path).
    #[must_use]
    pub fn parse_iteration(&self, path: &Path) -> Option<u64> {
        let stem = path.file_stem()?.to_str()?;
        let digits = stem.strip_prefix(self.names.params_prefix.as_str())?;
        digits.parse().ok()
    }

    /// Enumerate checkpoint files in the params directory, sorted by
    /// training iteration. Files not matching the params template are
    /// ignored (the best-params copy in particular).
    pub fn checkpoint_files(&self) -> Result<Vec<CheckpointFile>> {
        let pattern = self
            .params_dir
            .join(format!("{}*.json", self.names.params_prefix));
        let pattern = pattern.to_string_lossy();

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            let Ok(path) = entry else { continue };
            if let Some(iteration) = self.parse_iteration(&path) {
                files.push(CheckpointFile { iteration, path });
            }
        }
        files.sort_by_key(|f| f.iteration);
        Ok(files)
    }
}
