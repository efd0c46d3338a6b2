//! Observations and corpus datasets.
//!
//! A [`Dataset`] is an ordered collection of [`Observation`]s loaded from a
//! JSON index file. Filtering returns new datasets; the source is never
//! mutated. Partition roles come from an external CSV assignment file keyed
//! by observation index.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// One of the three source audio collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    Rwc,
    Uiowa,
    Philharmonia,
}

impl Corpus {
    /// All corpora, in cross-validation order.
    pub const ALL: [Corpus; 3] = [Corpus::Rwc, Corpus::Uiowa, Corpus::Philharmonia];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Corpus::Rwc => "rwc",
            Corpus::Uiowa => "uiowa",
            Corpus::Philharmonia => "philharmonia",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Corpus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rwc" => Ok(Corpus::Rwc),
            "uiowa" => Ok(Corpus::Uiowa),
            "philharmonia" => Ok(Corpus::Philharmonia),
            other => Err(CoreError::Dataset(format!("unknown corpus: {other}"))),
        }
    }
}

/// Role of an observation within one cross-validation fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    Valid,
    Test,
}

impl Partition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Valid => "valid",
            Partition::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Partition::Train),
            "valid" => Ok(Partition::Valid),
            "test" => Ok(Partition::Test),
            other => Err(CoreError::Dataset(format!("unknown partition: {other}"))),
        }
    }
}

/// One labeled audio instance.
///
/// Constructed during corpus ingestion; `features` is populated by the
/// extraction step and `partition` by partition setup. Otherwise immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Unique id within a dataset.
    pub index: String,
    /// Corpus tag of the source collection.
    pub dataset: Corpus,
    /// Path to the audio file.
    pub audio_file: PathBuf,
    /// Raw, corpus-specific instrument label.
    pub instrument: String,
    #[serde(default)]
    pub source_key: Option<String>,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub note_number: Option<i32>,
    #[serde(default)]
    pub dynamic: Option<String>,
    #[serde(default)]
    pub partition: Option<Partition>,
    /// Extracted feature files keyed by feature name (e.g. "cqt").
    /// Empty until extraction.
    #[serde(default)]
    pub features: BTreeMap<String, PathBuf>,
}

impl Observation {
    /// Schema sanity plus audio-file existence.
    #[must_use]
    pub fn validate(&self) -> bool {
        !self.index.is_empty() && !self.instrument.is_empty() && self.audio_file.exists()
    }
}

/// Ordered collection of observations with typed filter views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    #[must_use]
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    /// Load a dataset from a JSON index file, resolving relative audio and
    /// feature paths against `data_root`.
    pub fn load(index_path: &Path, data_root: &Path) -> Result<Self> {
        let bytes = std::fs::read(index_path).map_err(|e| {
            CoreError::Dataset(format!(
                "cannot read dataset index {}: {e}",
                index_path.display()
            ))
        })?;
        let mut observations: Vec<Observation> = serde_json::from_slice(&bytes)?;

        for obs in &mut observations {
            if obs.audio_file.is_relative() {
                obs.audio_file = data_root.join(&obs.audio_file);
            }
            for path in obs.features.values_mut() {
                if path.is_relative() {
                    *path = data_root.join(&*path);
                }
            }
        }

        Ok(Self::new(observations))
    }

    /// Serialize the observation set back to the JSON index format.
    ///
    /// Round-trips with [`load`](Self::load) modulo resolved vs. relative
    /// paths.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.observations)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Find an observation by its unique index.
    #[must_use]
    pub fn observation(&self, index: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.index == index)
    }

    /// New dataset restricted to one corpus.
    #[must_use]
    pub fn filter_by_corpus(&self, corpus: Corpus) -> Self {
        self.filter(|o| o.dataset == corpus)
    }

    /// New dataset restricted to one partition role.
    #[must_use]
    pub fn filter_by_partition(&self, partition: Partition) -> Self {
        self.filter(|o| o.partition == Some(partition))
    }

    /// New dataset of all observations matching `predicate`.
    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&Observation) -> bool) -> Self {
        Self::new(
            self.observations
                .iter()
                .filter(|o| predicate(o))
                .cloned()
                .collect(),
        )
    }

    /// Sorted distinct raw instrument labels.
    #[must_use]
    pub fn instruments(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .observations
            .iter()
            .map(|o| o.instrument.as_str())
            .collect();
        set.into_iter().map(String::from).collect()
    }

    /// Observation count per corpus.
    #[must_use]
    pub fn corpus_counts(&self) -> BTreeMap<Corpus, usize> {
        let mut counts = BTreeMap::new();
        for obs in &self.observations {
            *counts.entry(obs.dataset).or_insert(0) += 1;
        }
        counts
    }

    /// True if every observation carries the named feature.
    #[must_use]
    pub fn has_features(&self, key: &str) -> bool {
        !self.is_empty() && self.observations.iter().all(|o| o.features.contains_key(key))
    }

    /// True only if every observation validates and indices are unique.
    ///
    /// An empty dataset is non-valid: it logs a warning and returns false
    /// rather than silently succeeding.
    #[must_use]
    pub fn validate(&self) -> bool {
        if self.observations.is_empty() {
            warn!("no observations to validate");
            return false;
        }
        let indices: BTreeSet<&str> = self
            .observations
            .iter()
            .map(|o| o.index.as_str())
            .collect();
        if indices.len() != self.observations.len() {
            warn!("dataset contains duplicate observation indices");
            return false;
        }
        self.observations.iter().all(Observation::validate)
    }

    /// New dataset with partition roles assigned from an external map keyed
    /// by observation index. Observations absent from the map keep no
    /// partition; the driver enforces the exhaustive-cover invariant.
    #[must_use]
    pub fn apply_partitions(&self, map: &BTreeMap<String, Partition>) -> Self {
        let mut observations = self.observations.clone();
        for obs in &mut observations {
            obs.partition = map.get(&obs.index).copied();
        }
        Self::new(observations)
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// Read a partition-assignment CSV (`index,partition` header) into a map.
pub fn load_partition_map(path: &Path) -> Result<BTreeMap<String, Partition>> {
    #[derive(Deserialize)]
    struct Row {
        index: String,
        partition: String,
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        CoreError::Dataset(format!("cannot read partition file {}: {e}", path.display()))
    })?;

    let mut map = BTreeMap::new();
    for row in reader.deserialize() {
        let row: Row = row?;
        map.insert(row.index, row.partition.parse()?);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn make_observation(index: &str, corpus: Corpus, audio: PathBuf) -> Observation {
        Observation {
            index: index.to_string(),
            dataset: corpus,
            audio_file: audio,
            instrument: "cello".to_string(),
            source_key: Some("src-1".to_string()),
            start_time: Some(0.0),
            duration: Some(1.5),
            note_number: Some(48),
            dynamic: Some("mf".to_string()),
            partition: None,
            features: BTreeMap::new(),
        }
    }

    fn write_audio(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really audio").unwrap();
        path
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let audio = write_audio(root, "a.wav");

        let ds = Dataset::new(vec![
            make_observation("obs-1", Corpus::Rwc, audio.clone()),
            make_observation("obs-2", Corpus::Uiowa, audio),
        ]);

        let index_path = root.join("index.json");
        ds.save(&index_path).unwrap();
        let loaded = Dataset::load(&index_path, root).unwrap();

        assert_eq!(ds, loaded);
    }

    #[test]
    fn test_load_resolves_relative_audio_paths() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write_audio(root, "a.wav");

        let ds = Dataset::new(vec![make_observation(
            "obs-1",
            Corpus::Rwc,
            PathBuf::from("a.wav"),
        )]);
        let index_path = root.join("index.json");
        ds.save(&index_path).unwrap();

        let loaded = Dataset::load(&index_path, root).unwrap();
        assert_eq!(loaded.observations()[0].audio_file, root.join("a.wav"));
        assert!(loaded.validate());
    }

    #[test]
    fn test_filters_do_not_mutate_source() {
        let temp = TempDir::new().unwrap();
        let audio = write_audio(temp.path(), "a.wav");
        let ds = Dataset::new(vec![
            make_observation("obs-1", Corpus::Rwc, audio.clone()),
            make_observation("obs-2", Corpus::Uiowa, audio.clone()),
            make_observation("obs-3", Corpus::Uiowa, audio),
        ]);

        let view = ds.filter_by_corpus(Corpus::Uiowa);
        assert_eq!(view.len(), 2);
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn test_apply_partitions_covers_and_is_disjoint() {
        let temp = TempDir::new().unwrap();
        let audio = write_audio(temp.path(), "a.wav");
        let ds = Dataset::new(vec![
            make_observation("obs-1", Corpus::Rwc, audio.clone()),
            make_observation("obs-2", Corpus::Uiowa, audio.clone()),
            make_observation("obs-3", Corpus::Philharmonia, audio),
        ]);

        let mut map = BTreeMap::new();
        map.insert("obs-1".to_string(), Partition::Train);
        map.insert("obs-2".to_string(), Partition::Valid);
        map.insert("obs-3".to_string(), Partition::Test);

        let parted = ds.apply_partitions(&map);
        let train = parted.filter_by_partition(Partition::Train);
        let valid = parted.filter_by_partition(Partition::Valid);
        let test = parted.filter_by_partition(Partition::Test);

        assert_eq!(train.len() + valid.len() + test.len(), parted.len());
        assert_eq!(train.observations()[0].index, "obs-1");
        assert_eq!(valid.observations()[0].index, "obs-2");
        assert_eq!(test.observations()[0].index, "obs-3");
    }

    #[test]
    fn test_validate_empty_dataset_is_false() {
        assert!(!Dataset::default().validate());
    }

    #[test]
    fn test_validate_rejects_duplicate_indices() {
        let temp = TempDir::new().unwrap();
        let audio = write_audio(temp.path(), "a.wav");
        let ds = Dataset::new(vec![
            make_observation("obs-1", Corpus::Rwc, audio.clone()),
            make_observation("obs-1", Corpus::Uiowa, audio),
        ]);
        assert!(!ds.validate());
    }

    #[test]
    fn test_validate_requires_audio_file_on_disk() {
        let ds = Dataset::new(vec![make_observation(
            "obs-1",
            Corpus::Rwc,
            PathBuf::from("/nonexistent/a.wav"),
        )]);
        assert!(!ds.validate());
    }

    #[test]
    fn test_load_partition_map() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partitions.csv");
        std::fs::write(&path, "index,partition\nobs-1,train\nobs-2,valid\nobs-3,test\n").unwrap();

        let map = load_partition_map(&path).unwrap();
        assert_eq!(map["obs-1"], Partition::Train);
        assert_eq!(map["obs-2"], Partition::Valid);
        assert_eq!(map["obs-3"], Partition::Test);
    }

    #[test]
    fn test_load_partition_map_rejects_bad_partition() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partitions.csv");
        std::fs::write(&path, "index,partition\nobs-1,holdout\n").unwrap();
        assert!(load_partition_map(&path).is_err());
    }

    #[test]
    fn test_corpus_round_trip_strings() {
        for corpus in Corpus::ALL {
            assert_eq!(corpus.as_str().parse::<Corpus>().unwrap(), corpus);
        }
    }
}
