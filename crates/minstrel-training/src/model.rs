//! The model collaborator seam.
//!
//! The neural network itself (architecture, forward/backward pass,
//! optimizer) is an external capability; the driver only depends on the
//! [`Model`] trait. [`ConstantModel`] is a minimal reference implementation
//! used by tests and smoke runs.

use crate::error::{Result, TrainingError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One training or evaluation batch: flattened input windows and their
/// class-index targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Vec<f32>>,
    pub targets: Vec<usize>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// External model capability: train on a batch, predict class
/// distributions, and persist/restore parameters.
pub trait Model {
    /// Short identifier for logs.
    fn id(&self) -> &'static str;

    /// Run one training step and return the batch loss.
    fn train_batch(&mut self, batch: &Batch) -> Result<f64>;

    /// Per-row class probability distributions.
    fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>>;

    /// Persist current parameters to a checkpoint file.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace current parameters from a checkpoint file.
    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Builds a model instance for a configured architecture identifier.
pub trait ModelFactory {
    fn build(&self, architecture: &str, t_len: usize, n_targets: usize) -> Result<Box<dyn Model>>;
}

/// A trivial model with constant behavior: fixed training loss, and a fixed
/// probability mass on one predicted class. Its checkpoint files are plain
/// JSON of the struct, which lets tests script per-checkpoint behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantModel {
    pub n_targets: usize,
    /// Loss returned by every training step.
    pub train_loss: f64,
    /// Class this model always favors.
    pub predicted_class: usize,
    /// Probability assigned to `predicted_class`; the remainder is spread
    /// evenly over the other classes.
    pub likelihood: f64,
}

impl ConstantModel {
    #[must_use]
    pub fn new(n_targets: usize) -> Self {
        Self {
            n_targets,
            train_loss: 1.0,
            predicted_class: 0,
            likelihood: 0.9,
        }
    }

    fn distribution(&self) -> Vec<f32> {
        let n = self.n_targets.max(1);
        let rest = if n > 1 {
            (1.0 - self.likelihood) / (n as f64 - 1.0)
        } else {
            0.0
        };
        (0..n)
            .map(|i| {
                if i == self.predicted_class {
                    self.likelihood as f32
                } else {
                    rest as f32
                }
            })
            .collect()
    }
}

impl Model for ConstantModel {
    fn id(&self) -> &'static str {
        "constant"
    }

    fn train_batch(&mut self, batch: &Batch) -> Result<f64> {
        if batch.is_empty() {
            return Err(TrainingError::Model("cannot train on an empty batch".to_string()));
        }
        Ok(self.train_loss)
    }

    fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
        Ok(vec![self.distribution(); batch.len()])
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| {
            TrainingError::Model(format!("cannot read checkpoint {}: {e}", path.display()))
        })?;
        *self = serde_json::from_slice(&bytes)?;
        Ok(())
    }
}

/// Factory for [`ConstantModel`]; accepts any architecture id starting with
/// "constant".
#[derive(Debug, Default)]
pub struct ConstantModelFactory;

impl ModelFactory for ConstantModelFactory {
    fn build(&self, architecture: &str, _t_len: usize, n_targets: usize) -> Result<Box<dyn Model>> {
        if architecture.starts_with("constant") {
            Ok(Box::new(ConstantModel::new(n_targets)))
        } else {
            Err(TrainingError::Model(format!(
                "no model registered for architecture {architecture:?}"
            )))
        }
    }
}
