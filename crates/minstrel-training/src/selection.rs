//! Checkpoint search for model selection.
//!
//! Given the ordered checkpoint list and a validation set, find the
//! checkpoint with minimum validation loss while evaluating as few
//! checkpoints as possible. Validation loss is assumed to decrease with
//! training iteration and then plateau or rise again (overfitting), so a
//! ternary-style interval search converges without evaluating everything.
//!
//! This is a heuristic: the loss curve is not guaranteed unimodal, and the
//! search can miss the global optimum when it is noisy. That trade-off is
//! deliberate; exhaustive evaluation is prohibitively expensive for large
//! checkpoint counts but remains available via [`SearchMode::Exhaustive`].

use crate::error::{Result, TrainingError};
use crate::layout::CheckpointFile;
use crate::model::{Batch, Model};
use crate::stream::Slicer;
use minstrel_core::{Dataset, FeatureData, InstrumentClassMap, CQT_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Upper bound on full-validation evaluations per search.
pub const DEFAULT_MAX_EVALUATIONS: usize = 32;

/// Rows per prediction call during evaluation.
const EVAL_BATCH: usize = 32;

/// Validation result for one evaluated checkpoint. The search records every
/// checkpoint it actually evaluated, not just the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub model_iteration: u64,
    pub model_file: PathBuf,
    pub mean_loss: f64,
    pub mean_acc: f64,
    pub n_windows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Interval search under the unimodality assumption.
    Search,
    /// Evaluate every checkpoint. Exact but expensive.
    Exhaustive,
}

/// Interval search over a directory of checkpointed models.
pub struct BinarySearchModelSelector<'a> {
    checkpoints: Vec<CheckpointFile>,
    validation: &'a Dataset,
    class_map: &'a InstrumentClassMap,
    slicer: Slicer,
    t_len: usize,
    mode: SearchMode,
    max_evaluations: usize,
    show_progress: bool,
}

impl<'a> BinarySearchModelSelector<'a> {
    /// # Errors
    /// Fails immediately on an empty checkpoint list; a search over nothing
    /// must not return a degenerate "best".
    pub fn new(
        checkpoints: Vec<CheckpointFile>,
        validation: &'a Dataset,
        class_map: &'a InstrumentClassMap,
        slicer: Slicer,
        t_len: usize,
    ) -> Result<Self> {
        if checkpoints.is_empty() {
            return Err(TrainingError::NoCheckpoints("(empty checkpoint list)".to_string()));
        }
        Ok(Self {
            checkpoints,
            validation,
            class_map,
            slicer,
            t_len,
            mode: SearchMode::Search,
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            show_progress: false,
        })
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations.max(1);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Run the search. Returns one row per evaluated checkpoint, sorted by
    /// iteration, plus the best row: maximum mean accuracy, ties broken by
    /// lower mean loss. Deterministic for fixed inputs.
    pub fn select(&self, model: &mut dyn Model) -> Result<(Vec<EvaluationRow>, EvaluationRow)> {
        let (windows, targets) = self.validation_windows()?;
        let mut cache: BTreeMap<usize, EvaluationRow> = BTreeMap::new();

        match self.mode {
            SearchMode::Exhaustive => {
                for idx in 0..self.checkpoints.len() {
                    self.evaluate(model, idx, &windows, &targets, &mut cache)?;
                }
            }
            SearchMode::Search => {
                let mut lo = 0usize;
                let mut hi = self.checkpoints.len() - 1;

                // Two interior probes per round; the side dominated by the
                // higher loss cannot contain the minimum of a unimodal
                // curve, so the interval shrinks by a third each round.
                while hi - lo > 2 && cache.len() < self.max_evaluations {
                    let third = (hi - lo) / 3;
                    let m1 = lo + third;
                    let m2 = hi - third;

                    let l1 = self.evaluate(model, m1, &windows, &targets, &mut cache)?;
                    let l2 = self.evaluate(model, m2, &windows, &targets, &mut cache)?;

                    if l1 < l2 {
                        hi = m2;
                    } else {
                        lo = m1;
                    }
                }

                for idx in lo..=hi {
                    if cache.len() >= self.max_evaluations {
                        warn!(
                            budget = self.max_evaluations,
                            "evaluation budget reached before the interval collapsed"
                        );
                        break;
                    }
                    self.evaluate(model, idx, &windows, &targets, &mut cache)?;
                }
            }
        }

        let rows: Vec<EvaluationRow> = cache.into_values().collect();
        let best = best_row(&rows)
            .ok_or_else(|| TrainingError::Selection("no checkpoints were evaluated".to_string()))?
            .clone();

        info!(
            evaluated = rows.len(),
            total = self.checkpoints.len(),
            best_iteration = best.model_iteration,
            best_mean_acc = best.mean_acc,
            "model selection finished"
        );
        Ok((rows, best))
    }

    /// Slice one evaluation window per usable validation observation.
    /// Computed once and shared across every checkpoint evaluation.
    fn validation_windows(&self) -> Result<(Vec<Vec<f32>>, Vec<usize>)> {
        let mut windows = Vec::new();
        let mut targets = Vec::new();

        for obs in self.validation {
            let Some(feature_path) = obs.features.get(CQT_KEY) else {
                warn!(index = %obs.index, "validation observation has no cqt features; skipping");
                continue;
            };
            if self.class_map.lookup(&obs.instrument).is_none() {
                warn!(index = %obs.index, instrument = %obs.instrument,
                      "unmapped validation label; skipping");
                continue;
            }
            let features = FeatureData::load(feature_path)?;
            windows.push(self.slicer.slice_window(&features, self.t_len));
            targets.push(self.class_map.index_of(&obs.instrument)?);
        }

        if windows.is_empty() {
            return Err(TrainingError::Selection(
                "validation set has no usable observations".to_string(),
            ));
        }
        Ok((windows, targets))
    }

    /// Evaluate one checkpoint over the whole validation set; results are
    /// cached so no checkpoint is ever evaluated twice.
    fn evaluate(
        &self,
        model: &mut dyn Model,
        idx: usize,
        windows: &[Vec<f32>],
        targets: &[usize],
        cache: &mut BTreeMap<usize, EvaluationRow>,
    ) -> Result<f64> {
        if let Some(row) = cache.get(&idx) {
            return Ok(row.mean_loss);
        }

        let checkpoint = &self.checkpoints[idx];
        model.load(&checkpoint.path)?;

        let mut total_loss = 0.0;
        let mut correct = 0usize;

        for (window_chunk, target_chunk) in
            windows.chunks(EVAL_BATCH).zip(targets.chunks(EVAL_BATCH))
        {
            let batch = Batch {
                inputs: window_chunk.to_vec(),
                targets: target_chunk.to_vec(),
            };
            let distributions = model.predict(&batch)?;
            if distributions.len() != batch.len() {
                return Err(TrainingError::Model(format!(
                    "model returned {} distributions for a batch of {}",
                    distributions.len(),
                    batch.len()
                )));
            }

            for (dist, &target) in distributions.iter().zip(target_chunk) {
                let p = f64::from(*dist.get(target).unwrap_or(&0.0));
                total_loss -= p.max(1e-9).ln();
                if argmax(dist) == Some(target) {
                    correct += 1;
                }
            }
        }

        let n_windows = windows.len();
        let row = EvaluationRow {
            model_iteration: checkpoint.iteration,
            model_file: checkpoint.path.clone(),
            mean_loss: total_loss / n_windows as f64,
            mean_acc: correct as f64 / n_windows as f64,
            n_windows,
        };

        if self.show_progress {
            info!(
                iteration = row.model_iteration,
                mean_loss = row.mean_loss,
                mean_acc = row.mean_acc,
                "evaluated checkpoint"
            );
        } else {
            debug!(
                iteration = row.model_iteration,
                mean_loss = row.mean_loss,
                mean_acc = row.mean_acc,
                "evaluated checkpoint"
            );
        }

        let mean_loss = row.mean_loss;
        cache.insert(idx, row);
        Ok(mean_loss)
    }
}

fn argmax(dist: &[f32]) -> Option<usize> {
    dist.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

fn best_row(rows: &[EvaluationRow]) -> Option<&EvaluationRow> {
    rows.iter().max_by(|a, b| {
        a.mean_acc
            .partial_cmp(&b.mean_acc)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.mean_loss
                    .partial_cmp(&a.mean_loss)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    })
}

/// Iteration with the maximum mean accuracy among the evaluated rows.
pub fn select_best_iteration(rows: &[EvaluationRow]) -> Result<u64> {
    best_row(rows)
        .map(|row| row.model_iteration)
        .ok_or_else(|| TrainingError::Selection("empty model-selection results".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstantModel;
    use minstrel_core::{Corpus, Observation};
    use std::cell::Cell;
    use std::path::Path;
    use tempfile::TempDir;

    fn validation_dataset(dir: &Path, n: usize) -> Dataset {
        let mut observations = Vec::new();
        for i in 0..n {
            let audio = dir.join(format!("v{i}.wav"));
            std::fs::write(&audio, b"audio").unwrap();
            let feature_path = dir.join(format!("v{i}_cqt.json"));
            FeatureData::new(vec![vec![0.5; 4]; 6]).save(&feature_path).unwrap();

            let mut features = std::collections::BTreeMap::new();
            features.insert(CQT_KEY.to_string(), feature_path);

            observations.push(Observation {
                index: format!("v{i}"),
                dataset: Corpus::Uiowa,
                audio_file: audio,
                // "bassoon" sorts first in the bundled table, so the target
                // index is 0 and matches ConstantModel's predicted class.
                instrument: "bassoon".to_string(),
                source_key: None,
                start_time: None,
                duration: None,
                note_number: None,
                dynamic: None,
                partition: Some(minstrel_core::Partition::Valid),
                features,
            });
        }
        Dataset::new(observations)
    }

    /// Checkpoints whose scripted validation loss is convex in the
    /// iteration index, with the minimum at `min_at`.
    fn convex_checkpoints(dir: &Path, count: u64, min_at: u64) -> Vec<CheckpointFile> {
        let mut files = Vec::new();
        for i in 0..count {
            let loss = ((i as f64 - min_at as f64).powi(2)) / 1000.0;
            let model = ConstantModel {
                n_targets: 2,
                train_loss: 1.0,
                predicted_class: 0,
                likelihood: (-loss).exp(),
            };
            let path = dir.join(format!("params_{i:03}.json"));
            model.save(&path).unwrap();
            files.push(CheckpointFile { iteration: i, path });
        }
        files
    }

    /// Counts how many distinct checkpoints get loaded.
    struct CountingModel {
        inner: ConstantModel,
        loads: Cell<usize>,
    }

    impl CountingModel {
        fn new() -> Self {
            Self { inner: ConstantModel::new(2), loads: Cell::new(0) }
        }
    }

    impl Model for CountingModel {
        fn id(&self) -> &'static str {
            "counting"
        }
        fn train_batch(&mut self, batch: &Batch) -> Result<f64> {
            self.inner.train_batch(batch)
        }
        fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
            self.inner.predict(batch)
        }
        fn save(&self, path: &Path) -> Result<()> {
            self.inner.save(path)
        }
        fn load(&mut self, path: &Path) -> Result<()> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load(path)
        }
    }

    #[test]
    fn test_search_converges_on_convex_curve_without_full_sweep() {
        let temp = TempDir::new().unwrap();
        let validation = validation_dataset(temp.path(), 3);
        let map = InstrumentClassMap::bundled().unwrap();
        let checkpoints = convex_checkpoints(temp.path(), 101, 50);
        let total = checkpoints.len();

        let selector =
            BinarySearchModelSelector::new(checkpoints, &validation, &map, Slicer::Cqt, 4)
                .unwrap();

        let mut model = CountingModel::new();
        let (rows, best) = selector.select(&mut model).unwrap();

        assert_eq!(best.model_iteration, 50);
        assert!(rows.len() < total, "search must not evaluate every checkpoint");
        assert_eq!(model.loads.get(), rows.len(), "each checkpoint evaluated at most once");
    }

    #[test]
    fn test_search_results_are_deterministic() {
        let temp = TempDir::new().unwrap();
        let validation = validation_dataset(temp.path(), 2);
        let map = InstrumentClassMap::bundled().unwrap();
        let checkpoints = convex_checkpoints(temp.path(), 40, 12);

        let run = |checkpoints: Vec<CheckpointFile>| {
            let selector = BinarySearchModelSelector::new(
                checkpoints,
                &validation,
                &map,
                Slicer::Cqt,
                4,
            )
            .unwrap();
            let mut model = ConstantModel::new(2);
            selector.select(&mut model).unwrap()
        };

        let (rows_a, best_a) = run(checkpoints.clone());
        let (rows_b, best_b) = run(checkpoints);
        assert_eq!(rows_a, rows_b);
        assert_eq!(best_a, best_b);
    }

    #[test]
    fn test_exhaustive_mode_evaluates_every_checkpoint() {
        let temp = TempDir::new().unwrap();
        let validation = validation_dataset(temp.path(), 2);
        let map = InstrumentClassMap::bundled().unwrap();
        let checkpoints = convex_checkpoints(temp.path(), 9, 4);

        let selector =
            BinarySearchModelSelector::new(checkpoints, &validation, &map, Slicer::Cqt, 4)
                .unwrap()
                .with_mode(SearchMode::Exhaustive);

        let mut model = ConstantModel::new(2);
        let (rows, best) = selector.select(&mut model).unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(best.model_iteration, 4);
    }

    #[test]
    fn test_empty_checkpoint_list_fails_cleanly() {
        let temp = TempDir::new().unwrap();
        let validation = validation_dataset(temp.path(), 1);
        let map = InstrumentClassMap::bundled().unwrap();

        let result =
            BinarySearchModelSelector::new(Vec::new(), &validation, &map, Slicer::Cqt, 4);
        assert!(matches!(result, Err(TrainingError::NoCheckpoints(_))));
    }

    #[test]
    fn test_select_best_iteration_argmax_accuracy() {
        let rows = vec![
            EvaluationRow {
                model_iteration: 10,
                model_file: PathBuf::from("params_10.json"),
                mean_loss: 0.9,
                mean_acc: 0.4,
                n_windows: 8,
            },
            EvaluationRow {
                model_iteration: 20,
                model_file: PathBuf::from("params_20.json"),
                mean_loss: 0.5,
                mean_acc: 0.8,
                n_windows: 8,
            },
        ];
        assert_eq!(select_best_iteration(&rows).unwrap(), 20);
        assert!(select_best_iteration(&[]).is_err());
    }
}
