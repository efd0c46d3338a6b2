//! The experiment driver.
//!
//! A stateful controller sequencing feature extraction, training, model
//! selection, prediction, and analysis across repeated leave-one-corpus-out
//! cross-validation folds. Scheduling is single-threaded and blocking: the
//! only suspension points are the batch stream and the model collaborator's
//! train/predict calls.
//!
//! Stages are resumable: each stage's output artifact is checked before
//! recomputation, and the explicit fold-state record tracks completion.

use crate::analyze::PredictionAnalyzer;
use crate::error::{Result, TrainingError};
use crate::jsonl::{read_jsonl, write_jsonl};
use crate::layout::ExperimentLayout;
use crate::model::{ConstantModelFactory, ModelFactory};
use crate::predict::{predict_all, read_predictions, write_predictions, PredictionRow};
use crate::selection::{select_best_iteration, BinarySearchModelSelector, EvaluationRow};
use crate::state::{FoldState, Stage};
use crate::stream::{InstrumentStreamer, Slicer};
use chrono::{DateTime, Utc};
use minstrel_core::dataset::{load_partition_map, Corpus, Dataset, Partition};
use minstrel_core::{Config, FeatureExtractor, InstrumentClassMap, TimerHolder, CQT_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Why the training loop stopped. All three are clean, expected
/// terminations, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    MaxTime,
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::MaxIterations => f.write_str("max iterations reached"),
            StopReason::MaxTime => f.write_str("max time reached"),
            StopReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// One row of the training-loss history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRow {
    pub timestamp: DateTime<Utc>,
    pub iteration: u64,
    pub loss: f64,
    pub stream_secs: f64,
    pub batch_train_secs: f64,
}

/// Observation counts by corpus and by mapped instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub corpus_counts: BTreeMap<Corpus, usize>,
    pub instrument_counts: BTreeMap<String, BTreeMap<Corpus, usize>>,
}

/// Factory for the built-in reference model. Real networks are external
/// collaborators registered by the caller.
#[must_use]
pub fn default_factory() -> Box<dyn ModelFactory> {
    Box::new(ConstantModelFactory)
}

/// Where [`Driver::load_dataset`] finds its observations.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// An already-built dataset, typically from tests.
    Provided(Dataset),
    /// An explicit index file, resolved against the configured data root.
    Index(std::path::PathBuf),
    /// The configured notes index, preferring the feature-enriched index
    /// when one has been persisted.
    Default,
}

/// Controller for running experiments and holding state.
pub struct Driver {
    config: Config,
    experiment_name: String,
    class_map: InstrumentClassMap,
    factory: Box<dyn ModelFactory>,
    extractor: Option<Box<dyn FeatureExtractor>>,
    stop: Arc<AtomicBool>,
    dataset: Option<Dataset>,
    train_set: Option<Dataset>,
    valid_set: Option<Dataset>,
    test_set: Option<Dataset>,
    fold: Option<Corpus>,
    layout: Option<ExperimentLayout>,
}

impl Driver {
    pub fn new(
        config: Config,
        experiment_name: impl Into<String>,
        factory: Box<dyn ModelFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            experiment_name: experiment_name.into(),
            class_map: InstrumentClassMap::bundled()?,
            factory,
            extractor: None,
            stop: Arc::new(AtomicBool::new(false)),
            dataset: None,
            train_set: None,
            valid_set: None,
            test_set: None,
            fold: None,
            layout: None,
        })
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn with_class_map(mut self, class_map: InstrumentClassMap) -> Self {
        self.class_map = class_map;
        self
    }

    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag checked at training-loop boundaries; setting it requests a
    /// clean finalize-and-return.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn dataset(&self) -> Result<&Dataset> {
        self.dataset
            .as_ref()
            .ok_or_else(|| TrainingError::Driver("load_dataset must run first".to_string()))
    }

    #[must_use]
    pub fn train_set(&self) -> Option<&Dataset> {
        self.train_set.as_ref()
    }

    #[must_use]
    pub fn valid_set(&self) -> Option<&Dataset> {
        self.valid_set.as_ref()
    }

    #[must_use]
    pub fn test_set(&self) -> Option<&Dataset> {
        self.test_set.as_ref()
    }

    #[must_use]
    pub fn class_map(&self) -> &InstrumentClassMap {
        &self.class_map
    }

    fn require_layout(&self) -> Result<ExperimentLayout> {
        self.layout
            .clone()
            .ok_or_else(|| TrainingError::Driver("setup_partitions must run first".to_string()))
    }

    fn advance_stage(&self, layout: &ExperimentLayout, stage: Stage) -> Result<()> {
        let mut state = FoldState::load_or_new(&layout.state_path())?;
        state.advance(stage);
        state.save(&layout.state_path())
    }

    /// Load the dataset from `source`. With `load_features`, runs
    /// extraction when features are missing and an extractor is configured.
    pub fn load_dataset(&mut self, source: DatasetSource, load_features: bool) -> Result<()> {
        let section = self.config.selected_section()?.clone();

        let ds = match source {
            DatasetSource::Provided(ds) => ds,
            DatasetSource::Index(path) => Dataset::load(&path, &section.root)?,
            DatasetSource::Default => {
                let features_index = self.config.features_index_path()?;
                if load_features && features_index.exists() {
                    debug!(path = %features_index.display(), "loading feature-enriched index");
                    Dataset::load(&features_index, &section.root)?
                } else {
                    Dataset::load(&section.notes_index, &section.root)?
                }
            }
        };

        if ds.is_empty() {
            return Err(TrainingError::Driver("dataset is empty".to_string()));
        }
        info!(observations = ds.len(), "dataset loaded");
        self.dataset = Some(ds);

        if load_features
            && !self.dataset()?.has_features(CQT_KEY)
            && self.extractor.is_some()
        {
            self.extract_features()?;
        }
        Ok(())
    }

    /// Extract features for every observation that lacks them.
    ///
    /// Returns true only when every row carries features afterwards; the
    /// feature-enriched index is persisted only in that case. Partial
    /// success updates the in-memory dataset but writes nothing.
    pub fn extract_features(&mut self) -> Result<bool> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| TrainingError::Driver("no feature extractor configured".to_string()))?;
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| TrainingError::Driver("load_dataset must run first".to_string()))?;
        let feature_dir = self.config.paths.feature_dir.clone();
        std::fs::create_dir_all(&feature_dir)?;

        info!(extractor = extractor.id(), observations = dataset.len(), "extracting features");

        let mut updated = Vec::with_capacity(dataset.len());
        let mut failures = 0usize;
        for obs in dataset {
            if obs.features.contains_key(CQT_KEY) {
                updated.push(obs.clone());
                continue;
            }
            match extractor.extract(obs, &feature_dir) {
                Ok(features) => {
                    let mut obs = obs.clone();
                    obs.features.extend(features);
                    updated.push(obs);
                }
                Err(e) => {
                    warn!(index = %obs.index, error = %e, "feature extraction failed");
                    failures += 1;
                    updated.push(obs.clone());
                }
            }
        }

        let updated = Dataset::new(updated);
        let complete = failures == 0;
        if complete {
            updated.save(&self.config.features_index_path()?)?;
        } else {
            warn!(failures, "partial extraction; features index not persisted");
        }
        self.dataset = Some(updated);
        Ok(complete)
    }

    /// Assign partitions for one held-out fold from the configured
    /// partition file and derive the train/valid/test views.
    ///
    /// # Errors
    /// Fails if the selected dataset config has no partition section, or if
    /// the partition file does not cover the dataset exactly.
    pub fn setup_partitions(&mut self, fold: Corpus) -> Result<()> {
        let section = self.config.selected_section()?.clone();
        let partitions = section.partitions.as_ref().ok_or_else(|| {
            TrainingError::Driver("partition files must be supplied for this dataset".to_string())
        })?;
        let partition_file = partitions.get(fold.as_str()).ok_or_else(|| {
            TrainingError::Driver(format!("no partition file configured for fold {fold}"))
        })?;

        let map = load_partition_map(partition_file)?;
        let dataset = self.dataset()?.apply_partitions(&map);

        let train = dataset.filter_by_partition(Partition::Train);
        let valid = dataset.filter_by_partition(Partition::Valid);
        let test = dataset.filter_by_partition(Partition::Test);

        // Partitions must be a disjoint exhaustive cover of the dataset.
        if train.len() + valid.len() + test.len() != dataset.len() {
            return Err(TrainingError::Driver(format!(
                "partition file does not cover the dataset ({} + {} + {} != {})",
                train.len(),
                valid.len(),
                test.len(),
                dataset.len()
            )));
        }

        let layout = ExperimentLayout::new(
            &self.config.paths.model_dir,
            &self.experiment_name,
            fold.as_str(),
            self.config.experiment.clone(),
            self.config.training.max_iterations,
        );
        layout.ensure_fold_dirs()?;
        train.save(&layout.split_path("train"))?;
        valid.save(&layout.split_path("valid"))?;
        self.advance_stage(&layout, Stage::Partitioned)?;

        info!(
            %fold,
            train = train.len(),
            valid = valid.len(),
            test = test.len(),
            "partitions assigned"
        );

        self.dataset = Some(dataset);
        self.train_set = Some(train);
        self.valid_set = Some(valid);
        self.test_set = Some(test);
        self.fold = Some(fold);
        self.layout = Some(layout);
        Ok(())
    }

    /// Run the bounded training loop, writing intermediate checkpoints.
    ///
    /// Stops at `max_iterations` or `max_time`, whichever comes first; an
    /// external interrupt is a clean stop. All three paths still write the
    /// final checkpoint and the loss history. Success means the
    /// training-loss artifact exists on disk afterwards.
    pub fn train_model(&mut self) -> Result<bool> {
        let layout = self.require_layout()?;
        let train_set = self
            .train_set
            .clone()
            .ok_or_else(|| TrainingError::Driver("setup_partitions must run first".to_string()))?;

        info!(experiment = %self.experiment_name, "starting training");
        self.config.save(&layout.config_snapshot_path())?;

        if !train_set.has_features(CQT_KEY) {
            error!("no features for input data; extract features first");
            return Ok(false);
        }

        let t = self.config.training.clone();
        debug!(
            t_len = t.t_len,
            batch_size = t.batch_size,
            n_targets = t.n_targets,
            max_iterations = t.max_iterations,
            max_time_secs = t.max_time_secs,
            "hyperparameters"
        );

        let slicer = Slicer::for_architecture(&self.config.model);
        let mut streamer = InstrumentStreamer::new(
            &train_set,
            &self.class_map,
            slicer,
            t.t_len,
            t.batch_size,
        )?;
        info!(model = %self.config.model, "setting up model");
        let mut model = self.factory.build(&self.config.model, t.t_len, t.n_targets)?;

        let mut timers = TimerHolder::new();
        let mut rows: Vec<LossRow> = Vec::new();
        let mut min_mean_loss = f64::INFINITY;
        let mut iteration: u64 = 0;
        let started = Instant::now();
        let max_time = Duration::from_secs(t.max_time_secs);

        timers.start("train");
        info!("beginning training loop");
        let reason = loop {
            timers.start(("stream", iteration));
            let batch = streamer.next_batch()?;
            let stream_dur = timers.end(("stream", iteration))?;

            timers.start(("batch_train", iteration));
            let loss = model.train_batch(&batch)?;
            let train_dur = timers.end(("batch_train", iteration))?;

            rows.push(LossRow {
                timestamp: Utc::now(),
                iteration,
                loss,
                stream_secs: stream_dur.as_secs_f64(),
                batch_train_secs: train_dur.as_secs_f64(),
            });
            debug!(iteration, loss, stream = ?stream_dur, train = ?train_dur, "iteration timing");

            if let Some(freq) = t.iteration_print_frequency {
                if freq > 0 && iteration % freq == 0 {
                    let window = rows.len().min(freq as usize);
                    let mean: f64 =
                        rows[rows.len() - window..].iter().map(|r| r.loss).sum::<f64>()
                            / window as f64;
                    info!(
                        iteration,
                        mean_train_loss = mean,
                        improved = mean < min_mean_loss,
                        "training status"
                    );
                    min_mean_loss = min_mean_loss.min(mean);
                    let lo = iteration.saturating_sub(freq);
                    debug!(
                        mean_stream = ?timers.mean_over("stream", lo, iteration + 1),
                        mean_train = ?timers.mean_over("batch_train", lo, iteration + 1),
                        "mean stage times"
                    );
                }
            }

            if let Some(freq) = t.iteration_write_frequency {
                if freq > 0 && iteration % freq == 0 {
                    let path = layout.params_path(iteration);
                    debug!(path = %path.display(), "writing checkpoint");
                    model.save(&path)?;
                }
            }

            // Cancellation is cooperative, checked only at loop boundaries.
            if self.stop.load(Ordering::Relaxed) {
                break StopReason::Interrupted;
            }
            if started.elapsed() >= max_time {
                break StopReason::MaxTime;
            }
            iteration += 1;
            if iteration >= t.max_iterations {
                break StopReason::MaxIterations;
            }
        };
        timers.end("train")?;

        match reason {
            StopReason::Interrupted => warn!(iteration, "training cancelled"),
            reason => info!(%reason, "training stopped"),
        }

        // Clean stop on every path: keep the final iteration's checkpoint
        // and the full loss history.
        model.save(&layout.params_path(iteration))?;
        write_jsonl(&layout.training_loss_path(), &rows)?;

        info!(
            total_iterations = rows.len(),
            trained_for = ?timers.elapsed("train"),
            final_loss = rows.last().map(|r| r.loss),
            "completed training"
        );

        let ok = layout.training_loss_path().exists();
        if ok {
            self.advance_stage(&layout, Stage::Trained)?;
        }
        Ok(ok)
    }

    /// Search the checkpoint directory for the model minimizing validation
    /// loss. Resumable: if the validation-loss artifact already exists its
    /// rows are returned without re-running the search. On a fresh search,
    /// the winning checkpoint is copied to the canonical best-params path.
    pub fn find_best_model(&mut self) -> Result<Vec<EvaluationRow>> {
        let layout = self.require_layout()?;
        let valid_set = self
            .valid_set
            .clone()
            .ok_or_else(|| TrainingError::Driver("setup_partitions must run first".to_string()))?;

        info!(experiment = %self.experiment_name, "finding best model");
        if !valid_set.has_features(CQT_KEY) {
            return Err(TrainingError::Driver(
                "validation set is missing features".to_string(),
            ));
        }

        let validation_loss_path = layout.validation_loss_path();
        if validation_loss_path.exists() {
            info!("model search already done; loading previous results");
            let mut rows: Vec<EvaluationRow> = read_jsonl(&validation_loss_path)?;
            rows.sort_by_key(|r| r.model_iteration);
            return Ok(rows);
        }

        // Parameters come from the config snapshot training actually used.
        let original = Config::load(&layout.config_snapshot_path())?;
        let slicer = Slicer::for_architecture(&original.model);
        let t_len = original.training.t_len;

        let checkpoints = layout.checkpoint_files()?;
        if checkpoints.is_empty() {
            return Err(TrainingError::NoCheckpoints(
                layout.params_dir().display().to_string(),
            ));
        }

        let selector = BinarySearchModelSelector::new(
            checkpoints,
            &valid_set,
            &self.class_map,
            slicer,
            t_len,
        )?
        .with_progress(true);

        let mut model =
            self.factory
                .build(&original.model, t_len, original.training.n_targets)?;
        let (rows, best) = selector.select(model.as_mut())?;

        write_jsonl(&validation_loss_path, &rows)?;
        std::fs::copy(&best.model_file, layout.best_params_path())?;
        self.advance_stage(&layout, Stage::ModelSelected)?;
        Ok(rows)
    }

    /// Iteration that produced the best model, by mean accuracy.
    pub fn select_best_iteration(&self, rows: &[EvaluationRow]) -> Result<u64> {
        select_best_iteration(rows)
    }

    /// Predict over the entire dataset with the checkpoint from one
    /// iteration and persist the predictions table.
    pub fn predict(&mut self, iteration: u64) -> Result<Vec<PredictionRow>> {
        let layout = self.require_layout()?;
        let dataset = self.dataset()?.clone();

        if !dataset.has_features(CQT_KEY) {
            error!("predict: features missing");
            return Err(TrainingError::Driver("dataset is missing features".to_string()));
        }

        info!(experiment = %self.experiment_name, iteration, "evaluating with selected params");

        let original = Config::load(&layout.config_snapshot_path())?;
        let slicer = Slicer::for_architecture(&original.model);
        let t_len = original.training.t_len;

        let mut model =
            self.factory
                .build(&original.model, t_len, original.training.n_targets)?;
        model.load(&layout.params_path(iteration))?;

        let rows = predict_all(&dataset, model.as_ref(), &self.class_map, slicer, t_len)?;

        let predictions_path = layout.predictions_path(iteration);
        write_predictions(&predictions_path, &rows)?;
        if !predictions_path.exists() {
            return Err(TrainingError::Driver(
                "predictions artifact was not written".to_string(),
            ));
        }
        self.advance_stage(&layout, Stage::Predicted)?;
        Ok(rows)
    }

    /// Score predictions against the held-out corpus and persist the
    /// analysis artifact. Success means the artifact exists on disk.
    pub fn analyze(&mut self, predictions: &[PredictionRow], iteration: u64) -> Result<bool> {
        let layout = self.require_layout()?;
        let fold = self
            .fold
            .ok_or_else(|| TrainingError::Driver("setup_partitions must run first".to_string()))?;

        let analysis_path = layout.analysis_path(iteration);
        info!(path = %analysis_path.display(), "saving analysis");
        PredictionAnalyzer::new(predictions, fold, &self.class_map).save(&analysis_path)?;

        let ok = analysis_path.exists();
        if ok {
            self.advance_stage(&layout, Stage::Analyzed)?;
        }
        Ok(ok)
    }

    /// Load a persisted predictions table before scoring it.
    pub fn analyze_from_predictions(&mut self, iteration: u64) -> Result<bool> {
        let layout = self.require_layout()?;
        let rows = read_predictions(&layout.predictions_path(iteration))?;
        self.analyze(&rows, iteration)
    }

    /// Run partition, train, model selection, prediction, and analysis for
    /// one held-out corpus. Strict gating: each stage runs only if the
    /// immediately preceding stage succeeded.
    pub fn fit_and_predict_one(&mut self, fold: Corpus) -> Result<bool> {
        self.setup_partitions(fold)?;
        info!(%fold, "beginning fit_and_predict_one");

        let trained = self.train_model()?;
        if !trained {
            error!(%fold, "problem with training");
            return Ok(false);
        }

        let rows = self.find_best_model()?;
        let best = self.select_best_iteration(&rows)?;
        let predictions = self.predict(best)?;
        let analyzed = self.analyze(&predictions, best)?;

        info!(%fold, result = analyzed, "completed fit_and_predict_one");
        Ok(analyzed)
    }

    /// Leave-one-corpus-out cross-validation in fixed order. A failed fold
    /// is logged and recorded without aborting the sweep; the overall
    /// result is the AND of all folds.
    pub fn fit_and_predict_cross_validation(&mut self) -> Result<bool> {
        info!("beginning fit_and_predict_cross_validation");
        let mut results = Vec::new();
        let mut interrupted = false;
        for fold in Corpus::ALL {
            if self.stop.load(Ordering::Relaxed) {
                warn!(%fold, "stop requested; skipping remaining folds");
                interrupted = true;
                break;
            }
            let result = match self.fit_and_predict_one(fold) {
                Ok(ok) => ok,
                Err(e) => {
                    error!(%fold, error = %e, "fold failed");
                    false
                }
            };
            results.push(result);
        }
        let final_result = !interrupted && results.iter().all(|&r| r);
        info!(result = final_result, "completed fit_and_predict_cross_validation");
        Ok(final_result)
    }

    /// Observation counts per corpus and per mapped instrument.
    pub fn dataset_stats(&self) -> Result<DatasetStats> {
        let dataset = self.dataset()?;
        let mut instrument_counts: BTreeMap<String, BTreeMap<Corpus, usize>> = BTreeMap::new();
        for obs in dataset {
            if self.class_map.lookup(&obs.instrument).is_some() {
                *instrument_counts
                    .entry(obs.instrument.clone())
                    .or_default()
                    .entry(obs.dataset)
                    .or_insert(0) += 1;
            }
        }
        Ok(DatasetStats {
            corpus_counts: dataset.corpus_counts(),
            instrument_counts,
        })
    }

    /// Validate the loaded dataset (schema plus file existence).
    pub fn validate_data(&self) -> Result<bool> {
        Ok(self.dataset()?.validate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Batch, ConstantModel, Model};
    use minstrel_core::config::{
        CorpusSection, DataConfig, ExperimentConfig, PathsConfig, TrainingConfig,
    };
    use minstrel_core::{FeatureData, Observation};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn make_observation(root: &Path, index: &str, corpus: Corpus, instrument: &str) -> Observation {
        let audio = root.join(format!("{index}.wav"));
        std::fs::write(&audio, b"audio").unwrap();

        let feature_path = root.join("features").join(format!("{index}_cqt.json"));
        FeatureData::new(vec![vec![0.25; 4]; 8]).save(&feature_path).unwrap();

        let mut features = BTreeMap::new();
        features.insert(CQT_KEY.to_string(), feature_path);

        Observation {
            index: index.to_string(),
            dataset: corpus,
            audio_file: audio,
            instrument: instrument.to_string(),
            source_key: None,
            start_time: None,
            duration: None,
            note_number: None,
            dynamic: None,
            partition: None,
            features,
        }
    }

    /// Three observations, one per corpus, indexed on disk, with a
    /// partition file for the rwc fold assigning train/valid/test.
    fn fixture(root: &Path, max_iterations: u64) -> (Config, Dataset) {
        let dataset = Dataset::new(vec![
            make_observation(root, "train-1", Corpus::Uiowa, "cello"),
            make_observation(root, "valid-1", Corpus::Philharmonia, "flute"),
            make_observation(root, "test-1", Corpus::Rwc, "oboe"),
        ]);
        let index_path = root.join("index.json");
        dataset.save(&index_path).unwrap();

        let partition_path = root.join("partitions").join("rwc.csv");
        std::fs::create_dir_all(partition_path.parent().unwrap()).unwrap();
        std::fs::write(
            &partition_path,
            "index,partition\ntrain-1,train\nvalid-1,valid\ntest-1,test\n",
        )
        .unwrap();

        let mut partitions = BTreeMap::new();
        partitions.insert("rwc".to_string(), partition_path);
        let mut sets = BTreeMap::new();
        sets.insert(
            "minst".to_string(),
            CorpusSection {
                notes_index: index_path,
                root: root.to_path_buf(),
                partitions: Some(partitions),
            },
        );

        let config = Config {
            data: DataConfig { selected: "minst".to_string(), sets },
            paths: PathsConfig {
                feature_dir: root.join("features"),
                model_dir: root.join("models"),
            },
            model: "constant_cqt".to_string(),
            training: TrainingConfig {
                max_iterations,
                max_time_secs: 3600,
                batch_size: 2,
                t_len: 4,
                n_targets: 12,
                iteration_print_frequency: Some(2),
                iteration_write_frequency: Some(2),
            },
            experiment: ExperimentConfig::default(),
        };
        (config, dataset)
    }

    fn driver(root: &Path, max_iterations: u64) -> Driver {
        let (config, dataset) = fixture(root, max_iterations);
        let mut driver = Driver::new(config, "exp-test", default_factory()).unwrap();
        driver.load_dataset(DatasetSource::Provided(dataset), false).unwrap();
        driver
    }

    #[test]
    fn test_setup_partitions_covers_dataset() {
        let temp = TempDir::new().unwrap();
        let mut driver = driver(temp.path(), 10);
        driver.setup_partitions(Corpus::Rwc).unwrap();

        assert_eq!(driver.train_set().unwrap().len(), 1);
        assert_eq!(driver.valid_set().unwrap().len(), 1);
        assert_eq!(driver.test_set().unwrap().len(), 1);
    }

    #[test]
    fn test_setup_partitions_rejects_incomplete_cover() {
        let temp = TempDir::new().unwrap();
        let mut driver = driver(temp.path(), 10);
        // Drop one assignment from the partition file.
        let partition_path = temp.path().join("partitions").join("rwc.csv");
        std::fs::write(&partition_path, "index,partition\ntrain-1,train\nvalid-1,valid\n")
            .unwrap();

        assert!(driver.setup_partitions(Corpus::Rwc).is_err());
    }

    #[test]
    fn test_setup_partitions_requires_partition_section() {
        let temp = TempDir::new().unwrap();
        let (mut config, dataset) = fixture(temp.path(), 10);
        config
            .data
            .sets
            .get_mut("minst")
            .unwrap()
            .partitions = None;

        let mut driver = Driver::new(config, "exp-test", default_factory()).unwrap();
        driver.load_dataset(DatasetSource::Provided(dataset), false).unwrap();
        assert!(driver.setup_partitions(Corpus::Rwc).is_err());
    }

    #[test]
    fn test_train_model_runs_exactly_max_iterations() {
        let temp = TempDir::new().unwrap();
        let mut driver = driver(temp.path(), 5);
        driver.setup_partitions(Corpus::Rwc).unwrap();

        assert!(driver.train_model().unwrap());

        let layout = driver.require_layout().unwrap();
        let rows: Vec<LossRow> = read_jsonl(&layout.training_loss_path()).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.last().unwrap().iteration, 4);
        // The final checkpoint encodes the iteration counter's final value.
        assert!(layout.params_path(5).exists());
    }

    /// Sets the driver's stop flag during its nth training call.
    struct InterruptingModel {
        inner: ConstantModel,
        stop: Arc<AtomicBool>,
        interrupt_on_call: u64,
        calls: u64,
    }

    impl Model for InterruptingModel {
        fn id(&self) -> &'static str {
            "interrupting"
        }
        fn train_batch(&mut self, batch: &Batch) -> Result<f64> {
            self.calls += 1;
            if self.calls == self.interrupt_on_call {
                self.stop.store(true, Ordering::Relaxed);
            }
            self.inner.train_batch(batch)
        }
        fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
            self.inner.predict(batch)
        }
        fn save(&self, path: &Path) -> Result<()> {
            self.inner.save(path)
        }
        fn load(&mut self, path: &Path) -> Result<()> {
            self.inner.load(path)
        }
    }

    struct InterruptingFactory {
        stop: Arc<AtomicBool>,
        interrupt_on_call: u64,
    }

    impl ModelFactory for InterruptingFactory {
        fn build(
            &self,
            _architecture: &str,
            _t_len: usize,
            n_targets: usize,
        ) -> Result<Box<dyn Model>> {
            Ok(Box::new(InterruptingModel {
                inner: ConstantModel::new(n_targets),
                stop: Arc::clone(&self.stop),
                interrupt_on_call: self.interrupt_on_call,
                calls: 0,
            }))
        }
    }

    #[test]
    fn test_interrupt_is_a_clean_stop_with_artifacts() {
        let temp = TempDir::new().unwrap();
        let (config, dataset) = fixture(temp.path(), 100);
        let stop = Arc::new(AtomicBool::new(false));

        // Interrupt during the 4th training call, i.e. iteration 3.
        let factory = Box::new(InterruptingFactory {
            stop: Arc::clone(&stop),
            interrupt_on_call: 4,
        });
        let mut driver = Driver::new(config, "exp-test", factory)
            .unwrap()
            .with_stop_flag(stop);
        driver.load_dataset(DatasetSource::Provided(dataset), false).unwrap();
        driver.setup_partitions(Corpus::Rwc).unwrap();

        assert!(driver.train_model().unwrap(), "interrupt must still succeed");

        let layout = driver.require_layout().unwrap();
        let rows: Vec<LossRow> = read_jsonl(&layout.training_loss_path()).unwrap();
        let iterations: Vec<u64> = rows.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![0, 1, 2, 3]);
        assert!(layout.params_path(3).exists());
    }

    #[test]
    fn test_find_best_model_resumes_from_cached_results() {
        let temp = TempDir::new().unwrap();
        let mut driver = driver(temp.path(), 10);
        driver.setup_partitions(Corpus::Rwc).unwrap();

        let layout = driver.require_layout().unwrap();
        // Snapshot the config as train_model would have.
        driver.config.save(&layout.config_snapshot_path()).unwrap();
        let cached = vec![EvaluationRow {
            model_iteration: 7,
            model_file: PathBuf::from("params_07.json"),
            mean_loss: 0.3,
            mean_acc: 0.9,
            n_windows: 1,
        }];
        write_jsonl(&layout.validation_loss_path(), &cached).unwrap();

        let rows = driver.find_best_model().unwrap();
        assert_eq!(rows, cached);
        assert_eq!(driver.select_best_iteration(&rows).unwrap(), 7);
    }

    #[test]
    fn test_train_model_without_features_returns_false() {
        let temp = TempDir::new().unwrap();
        let (config, dataset) = fixture(temp.path(), 10);
        // Strip the features off every observation.
        let stripped = Dataset::new(
            dataset
                .iter()
                .map(|o| {
                    let mut o = o.clone();
                    o.features.clear();
                    o
                })
                .collect(),
        );

        let mut driver = Driver::new(config, "exp-test", default_factory()).unwrap();
        driver.load_dataset(DatasetSource::Provided(stripped), false).unwrap();
        driver.setup_partitions(Corpus::Rwc).unwrap();

        assert!(!driver.train_model().unwrap());
    }

    #[test]
    fn test_dataset_stats_counts_mapped_instruments() {
        let temp = TempDir::new().unwrap();
        let driver = driver(temp.path(), 10);
        let stats = driver.dataset_stats().unwrap();

        assert_eq!(stats.corpus_counts[&Corpus::Uiowa], 1);
        assert_eq!(stats.instrument_counts["cello"][&Corpus::Uiowa], 1);
    }

    #[test]
    fn test_load_dataset_rejects_empty() {
        let temp = TempDir::new().unwrap();
        let (config, _) = fixture(temp.path(), 10);
        let mut driver = Driver::new(config, "exp-test", default_factory()).unwrap();
        assert!(driver.load_dataset(DatasetSource::Provided(Dataset::default()), false).is_err());
    }
}
