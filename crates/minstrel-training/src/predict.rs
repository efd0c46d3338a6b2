//! Whole-dataset prediction with a selected checkpoint.

use crate::error::{Result, TrainingError};
use crate::model::{Batch, Model};
use crate::stream::Slicer;
use minstrel_core::{Corpus, Dataset, FeatureData, InstrumentClassMap, CQT_KEY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// One prediction for one audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub index: String,
    pub dataset: Corpus,
    pub instrument: String,
    /// Class index of the true label; `None` when the raw label is
    /// unmapped.
    pub target: Option<usize>,
    /// Argmax class index of the predicted distribution.
    pub predicted: usize,
    /// Probability of the predicted class.
    pub max_likelihood: f64,
}

/// Predict over every observation in the dataset, not just the test
/// partition; analysis restricts to the held-out corpus afterwards.
/// Observations without features are skipped with a warning.
pub fn predict_all(
    dataset: &Dataset,
    model: &dyn Model,
    class_map: &InstrumentClassMap,
    slicer: Slicer,
    t_len: usize,
) -> Result<Vec<PredictionRow>> {
    let mut rows = Vec::new();

    for obs in dataset {
        let Some(feature_path) = obs.features.get(CQT_KEY) else {
            warn!(index = %obs.index, "no features for observation; skipping prediction");
            continue;
        };
        let features = FeatureData::load(feature_path)?;
        let batch = Batch {
            inputs: vec![slicer.slice_window(&features, t_len)],
            targets: vec![0],
        };

        let distributions = model.predict(&batch)?;
        let dist = distributions
            .first()
            .ok_or_else(|| TrainingError::Model("model returned no distribution".to_string()))?;
        let (predicted, max_likelihood) = dist
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &p)| (i, f64::from(p)))
            .ok_or_else(|| TrainingError::Model("model returned an empty distribution".to_string()))?;

        rows.push(PredictionRow {
            index: obs.index.clone(),
            dataset: obs.dataset,
            instrument: obs.instrument.clone(),
            target: class_map.index_of(&obs.instrument).ok(),
            predicted,
            max_likelihood,
        });
    }

    debug!(predicted = rows.len(), total = dataset.len(), "prediction pass complete");
    Ok(rows)
}

pub fn write_predictions(path: &Path, rows: &[PredictionRow]) -> Result<()> {
    crate::jsonl::write_jsonl(path, rows)
}

pub fn read_predictions(path: &Path) -> Result<Vec<PredictionRow>> {
    crate::jsonl::read_jsonl(path)
}
