//! Explicit per-fold stage tracking.
//!
//! The completion stage for each (experiment, fold) is persisted as a small
//! JSON record next to the artifacts, so resumption checks an explicit tag
//! instead of inferring progress from which files happen to exist. Artifact
//! existence is still verified before skipping work; the record resolves
//! partial-write ambiguity.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stages of one experiment fold, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    DatasetLoaded,
    FeaturesExtracted,
    Partitioned,
    Trained,
    ModelSelected,
    Predicted,
    Analyzed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldState {
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl FoldState {
    #[must_use]
    pub fn new() -> Self {
        Self { stage: Stage::Initialized, updated_at: Utc::now() }
    }

    /// Move forward to `stage`. Stages never regress; re-running an earlier
    /// step leaves the recorded stage untouched.
    pub fn advance(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
            self.updated_at = Utc::now();
        }
    }

    #[must_use]
    pub fn reached(&self, stage: Stage) -> bool {
        self.stage >= stage
    }

    /// Load the fold state, or start fresh if no record exists yet.
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl Default for FoldState {
    fn default() -> Self {
        Self::new()
    }
}
