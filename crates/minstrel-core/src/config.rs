//! Experiment configuration.
//!
//! Loaded from a TOML file; the driver snapshots the config into the
//! experiment directory at train time so later stages (model selection,
//! prediction) read the exact parameters training used.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub paths: PathsConfig,
    /// Model architecture identifier (e.g. "cqt_mlp", "wcqt_net"). The
    /// substring "wcqt"/"hcqt" selects the matching window slicer.
    pub model: String,
    pub training: TrainingConfig,
    #[serde(default)]
    pub experiment: ExperimentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Name of the dataset section to use.
    pub selected: String,
    /// Dataset sections by name.
    pub sets: BTreeMap<String, CorpusSection>,
}

/// One dataset section: where the index lives and how folds partition it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSection {
    /// JSON observation index.
    pub notes_index: PathBuf,
    /// Root directory for resolving relative audio paths.
    pub root: PathBuf,
    /// Partition-assignment CSV per held-out fold. Required for any
    /// partitioned run; absent for extract-only datasets.
    #[serde(default)]
    pub partitions: Option<BTreeMap<String, PathBuf>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where extracted features and the enriched index are written.
    pub feature_dir: PathBuf,
    /// Root for per-experiment model directories.
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Hard upper bound on training iterations.
    pub max_iterations: u64,
    /// Hard upper bound on training wall-clock time, in seconds.
    pub max_time_secs: u64,
    pub batch_size: usize,
    /// Input window length in frames.
    pub t_len: usize,
    /// Number of prediction targets (canonical classes).
    pub n_targets: usize,
    /// Log a rolling mean loss every this many iterations.
    #[serde(default)]
    pub iteration_print_frequency: Option<u64>,
    /// Checkpoint the model every this many iterations.
    #[serde(default)]
    pub iteration_write_frequency: Option<u64>,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(CoreError::Config("max_iterations must be >= 1".to_string()));
        }
        if self.max_time_secs == 0 {
            return Err(CoreError::Config("max_time_secs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(CoreError::Config("batch_size must be >= 1".to_string()));
        }
        if self.t_len == 0 {
            return Err(CoreError::Config("t_len must be >= 1".to_string()));
        }
        if self.n_targets == 0 {
            return Err(CoreError::Config("n_targets must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Filename templates for per-experiment artifacts. A `{}` placeholder is
/// substituted with the iteration number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub config_path: String,
    pub params_dir: String,
    pub params_prefix: String,
    pub best_params: String,
    pub training_loss: String,
    pub validation_loss: String,
    pub predictions_format: String,
    pub analysis_format: String,
    pub data_split_format: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            config_path: "experiment_config.toml".to_string(),
            params_dir: "params".to_string(),
            params_prefix: "params_".to_string(),
            best_params: "best_params.json".to_string(),
            training_loss: "training_loss.jsonl".to_string(),
            validation_loss: "validation_loss.jsonl".to_string(),
            predictions_format: "predictions_{}.jsonl".to_string(),
            analysis_format: "analysis_{}.json".to_string(),
            data_split_format: "{}_set.json".to_string(),
        }
    }
}

/// Substitute the first `{}` placeholder in an artifact filename template.
#[must_use]
pub fn format_template(template: &str, value: &str) -> String {
    template.replacen("{}", value, 1)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.data.sets.contains_key(&self.data.selected) {
            return Err(CoreError::Config(format!(
                "selected dataset {:?} has no [data.sets] section",
                self.data.selected
            )));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::Config("model architecture id is required".to_string()));
        }
        self.training.validate()
    }

    /// The dataset section named by `data.selected`.
    pub fn selected_section(&self) -> Result<&CorpusSection> {
        self.data.sets.get(&self.data.selected).ok_or_else(|| {
            CoreError::Config(format!(
                "selected dataset {:?} has no [data.sets] section",
                self.data.selected
            ))
        })
    }

    /// Path of the feature-enriched index: the notes-index filename placed
    /// under the feature directory.
    pub fn features_index_path(&self) -> Result<PathBuf> {
        let section = self.selected_section()?;
        let file_name = section.notes_index.file_name().ok_or_else(|| {
            CoreError::Config(format!(
                "notes_index {} has no file name",
                section.notes_index.display()
            ))
        })?;
        Ok(self.paths.feature_dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_config(root: &Path) -> Config {
        let mut sets = BTreeMap::new();
        let mut partitions = BTreeMap::new();
        partitions.insert("rwc".to_string(), root.join("partitions/rwc.csv"));
        sets.insert(
            "minst".to_string(),
            CorpusSection {
                notes_index: root.join("index.json"),
                root: root.to_path_buf(),
                partitions: Some(partitions),
            },
        );
        Config {
            data: DataConfig { selected: "minst".to_string(), sets },
            paths: PathsConfig {
                feature_dir: root.join("features"),
                model_dir: root.join("models"),
            },
            model: "cqt_mlp".to_string(),
            training: TrainingConfig {
                max_iterations: 100,
                max_time_secs: 3600,
                batch_size: 8,
                t_len: 4,
                n_targets: 12,
                iteration_print_frequency: Some(10),
                iteration_write_frequency: Some(10),
            },
            experiment: ExperimentConfig::default(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let path = temp.path().join("config.toml");

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded.data.selected, "minst");
        assert_eq!(loaded.training.max_iterations, 100);
        assert_eq!(loaded.experiment.params_dir, "params");
    }

    #[test]
    fn test_validate_rejects_missing_selected_section() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path());
        config.data.selected = "absent".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path());
        config.training.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_features_index_path_uses_notes_index_file_name() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        assert_eq!(
            config.features_index_path().unwrap(),
            temp.path().join("features").join("index.json")
        );
    }

    #[test]
    fn test_format_template() {
        assert_eq!(format_template("predictions_{}.jsonl", "42"), "predictions_42.jsonl");
        assert_eq!(format_template("analysis.json", "42"), "analysis.json");
    }
}
