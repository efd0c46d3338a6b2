//! Scoring of prediction tables.
//!
//! The analyzer restricts predictions to the held-out corpus and computes
//! accuracy, per-class precision/recall/F1, and a confusion matrix. Rows
//! whose raw label is unmapped carry no target and are excluded from
//! scoring.

use crate::error::{Result, TrainingError};
use crate::predict::PredictionRow;
use minstrel_core::{Corpus, InstrumentClassMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Persisted scoring summary for one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub test_set: Corpus,
    /// Scored files (rows from the held-out corpus with a mapped target).
    pub n_files: usize,
    pub accuracy: f64,
    pub class_precision: BTreeMap<String, f64>,
    pub class_recall: BTreeMap<String, f64>,
    pub class_f1: BTreeMap<String, f64>,
    /// Canonical class names; position equals class index.
    pub classes: Vec<String>,
    /// `confusion[target][predicted]` counts.
    pub confusion: Vec<Vec<usize>>,
}

pub struct PredictionAnalyzer {
    rows: Vec<PredictionRow>,
    test_set: Corpus,
    classes: Vec<String>,
}

impl PredictionAnalyzer {
    /// Restrict `rows` to the held-out corpus.
    #[must_use]
    pub fn new(rows: &[PredictionRow], test_set: Corpus, class_map: &InstrumentClassMap) -> Self {
        let rows = rows
            .iter()
            .filter(|r| r.dataset == test_set)
            .cloned()
            .collect();
        Self {
            rows,
            test_set,
            classes: class_map.all_classes().to_vec(),
        }
    }

    pub fn summarize(&self) -> Result<AnalysisSummary> {
        let n_classes = self.classes.len();
        let mut confusion = vec![vec![0usize; n_classes]; n_classes];
        let mut scored = 0usize;
        let mut correct = 0usize;

        for row in &self.rows {
            let Some(target) = row.target else { continue };
            if target >= n_classes || row.predicted >= n_classes {
                return Err(TrainingError::Selection(format!(
                    "prediction row {} references class index outside the map",
                    row.index
                )));
            }
            confusion[target][row.predicted] += 1;
            scored += 1;
            if row.predicted == target {
                correct += 1;
            }
        }

        if scored == 0 {
            return Err(TrainingError::Selection(format!(
                "no scorable predictions for test set {}",
                self.test_set
            )));
        }

        let mut class_precision = BTreeMap::new();
        let mut class_recall = BTreeMap::new();
        let mut class_f1 = BTreeMap::new();

        for (i, class) in self.classes.iter().enumerate() {
            let tp = confusion[i][i];
            let predicted: usize = (0..n_classes).map(|t| confusion[t][i]).sum();
            let actual: usize = confusion[i].iter().sum();

            let precision = if predicted > 0 { tp as f64 / predicted as f64 } else { 0.0 };
            let recall = if actual > 0 { tp as f64 / actual as f64 } else { 0.0 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            class_precision.insert(class.clone(), precision);
            class_recall.insert(class.clone(), recall);
            class_f1.insert(class.clone(), f1);
        }

        Ok(AnalysisSummary {
            test_set: self.test_set,
            n_files: scored,
            accuracy: correct as f64 / scored as f64,
            class_precision,
            class_recall,
            class_f1,
            classes: self.classes.clone(),
            confusion,
        })
    }

    /// Compute the summary and persist it as JSON.
    pub fn save(&self, path: &Path) -> Result<AnalysisSummary> {
        let summary = self.summarize()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        info!(
            test_set = %summary.test_set,
            n_files = summary.n_files,
            accuracy = summary.accuracy,
            path = %path.display(),
            "analysis saved"
        );
        Ok(summary)
    }
}

pub fn load_summary(path: &Path) -> Result<AnalysisSummary> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
