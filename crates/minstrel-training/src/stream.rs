//! Deterministic batch streaming over a partitioned dataset.
//!
//! The streamer walks observations round-robin and yields fixed-size
//! batches of sliced feature windows. Determinism matters: model selection
//! requires the same validation data to produce the same probe sequence and
//! final answer on every run.

use crate::error::{Result, TrainingError};
use crate::model::Batch;
use minstrel_core::{Dataset, FeatureData, InstrumentClassMap, CQT_KEY};
use std::path::PathBuf;
use tracing::warn;

/// Window-slicing strategy, selected from the model-architecture id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slicer {
    Cqt,
    Wcqt,
    Hcqt,
}

impl Slicer {
    /// Substring match on the architecture id: "wcqt" and "hcqt" pick their
    /// slicers, anything else falls back to plain CQT.
    #[must_use]
    pub fn for_architecture(architecture: &str) -> Self {
        if architecture.contains("wcqt") {
            Slicer::Wcqt
        } else if architecture.contains("hcqt") {
            Slicer::Hcqt
        } else {
            Slicer::Cqt
        }
    }

    /// Slice a centered `t_len`-frame window out of a feature array and
    /// flatten it. Short inputs are zero-padded to the window length.
    #[must_use]
    pub fn slice_window(self, features: &FeatureData, t_len: usize) -> Vec<f32> {
        let n_frames = features.n_frames();
        let n_bins = features.n_bins();
        let start = n_frames.saturating_sub(t_len) / 2;

        let mut window = Vec::with_capacity(t_len * n_bins);
        for i in start..start + t_len {
            match features.frames.get(i) {
                Some(frame) => window.extend_from_slice(frame),
                None => window.extend(std::iter::repeat_n(0.0, n_bins)),
            }
        }
        window
    }
}

struct StreamItem {
    feature_path: PathBuf,
    target: usize,
    cached: Option<FeatureData>,
}

/// Infinite round-robin batch stream over a dataset's CQT features.
pub struct InstrumentStreamer {
    items: Vec<StreamItem>,
    cursor: usize,
    slicer: Slicer,
    t_len: usize,
    batch_size: usize,
}

impl InstrumentStreamer {
    /// Build a streamer over all observations that carry CQT features and a
    /// mapped instrument label. Unmapped labels are skipped with a warning;
    /// an empty usable set is an error.
    pub fn new(
        dataset: &Dataset,
        class_map: &InstrumentClassMap,
        slicer: Slicer,
        t_len: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainingError::Stream("batch_size must be >= 1".to_string()));
        }

        let mut items = Vec::new();
        for obs in dataset {
            let Some(feature_path) = obs.features.get(CQT_KEY) else {
                warn!(index = %obs.index, "observation has no cqt features; skipping");
                continue;
            };
            if class_map.lookup(&obs.instrument).is_none() {
                warn!(
                    index = %obs.index,
                    instrument = %obs.instrument,
                    "unmapped instrument label; skipping"
                );
                continue;
            }
            items.push(StreamItem {
                feature_path: feature_path.clone(),
                target: class_map.index_of(&obs.instrument)?,
                cached: None,
            });
        }

        if items.is_empty() {
            return Err(TrainingError::Stream(
                "no streamable observations (missing features or unmapped labels)".to_string(),
            ));
        }

        Ok(Self { items, cursor: 0, slicer, t_len, batch_size })
    }

    /// Number of streamable observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pull the next batch. This is a blocking call; feature files are read
    /// lazily on first use and cached.
    pub fn next_batch(&mut self) -> Result<Batch> {
        let mut batch = Batch::default();
        for _ in 0..self.batch_size {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % self.items.len();

            let item = &mut self.items[idx];
            if item.cached.is_none() {
                item.cached = Some(FeatureData::load(&item.feature_path)?);
            }
            let features = item.cached.as_ref().unwrap();

            batch.inputs.push(self.slicer.slice_window(features, self.t_len));
            batch.targets.push(item.target);
        }
        Ok(batch)
    }
}
