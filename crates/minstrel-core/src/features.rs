//! Extracted spectral features and the feature-extractor seam.
//!
//! The DSP itself (CQT computation, onset detection, resampling) lives
//! behind the [`FeatureExtractor`] trait; this crate only defines the
//! on-disk feature format and the contract the driver relies on.

use crate::dataset::Observation;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Feature key used for constant-Q transform frames.
pub const CQT_KEY: &str = "cqt";

/// A time-by-bins spectral array persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureData {
    /// One row per analysis frame.
    pub frames: Vec<Vec<f32>>,
}

impl FeatureData {
    #[must_use]
    pub fn new(frames: Vec<Vec<f32>>) -> Self {
        Self { frames }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            CoreError::Feature(format!("cannot read feature file {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Bins per frame; zero for an empty array.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.frames.first().map_or(0, Vec::len)
    }
}

/// External feature-extraction collaborator.
///
/// Implementations compute spectral features for one observation and write
/// them under `out_dir`, returning the feature-key to file-path map to be
/// recorded on the observation. The driver treats extraction as an opaque
/// blocking call with an all-or-nothing completion contract across the
/// dataset.
pub trait FeatureExtractor {
    /// Short identifier for logs.
    fn id(&self) -> &'static str;

    fn extract(&self, obs: &Observation, out_dir: &Path) -> Result<BTreeMap<String, PathBuf>>;
}
