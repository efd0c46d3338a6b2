//! Minstrel Core
//!
//! Data-model primitives for instrument-classification experiments:
//! - Canonical instrument labels (`InstrumentClassMap`)
//! - Observations and corpus datasets (`Dataset`, `Observation`)
//! - Extracted spectral features and the extractor seam (`FeatureData`, `FeatureExtractor`)
//! - Experiment configuration (`Config`)
//! - Named stopwatch timing (`TimerHolder`)

pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod labels;
pub mod timer;

pub use config::{Config, CorpusSection, DataConfig, ExperimentConfig, PathsConfig, TrainingConfig};
pub use dataset::{load_partition_map, Corpus, Dataset, Observation, Partition};
pub use error::{CoreError, Result};
pub use features::{FeatureData, FeatureExtractor, CQT_KEY};
pub use labels::InstrumentClassMap;
pub use timer::{TimerHolder, TimerKey};
