//! Minstrel Training
//!
//! Experiment orchestration for instrument-classification models:
//! - Per-experiment directory layout and checkpoint discovery (`ExperimentLayout`)
//! - Explicit per-fold stage tracking (`FoldState`)
//! - The model collaborator seam (`Model`, `ModelFactory`)
//! - Deterministic batch streaming (`InstrumentStreamer`)
//! - Checkpoint search for model selection (`BinarySearchModelSelector`)
//! - Whole-dataset prediction and scoring (`predict_all`, `PredictionAnalyzer`)
//! - The experiment driver (`Driver`)

pub mod analyze;
pub mod driver;
pub mod error;
pub mod jsonl;
pub mod layout;
pub mod model;
pub mod predict;
pub mod selection;
pub mod state;
pub mod stream;

pub use analyze::{load_summary, AnalysisSummary, PredictionAnalyzer};
pub use driver::{default_factory, DatasetSource, DatasetStats, Driver, LossRow, StopReason};
pub use error::{Result, TrainingError};
pub use jsonl::{read_jsonl, write_jsonl};
pub use layout::{CheckpointFile, ExperimentLayout};
pub use model::{Batch, ConstantModel, ConstantModelFactory, Model, ModelFactory};
pub use predict::{predict_all, read_predictions, write_predictions, PredictionRow};
pub use selection::{
    select_best_iteration, BinarySearchModelSelector, EvaluationRow, SearchMode,
};
pub use state::{FoldState, Stage};
pub use stream::{InstrumentStreamer, Slicer};
