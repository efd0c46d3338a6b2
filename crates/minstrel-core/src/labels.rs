//! Mapping between corpus-specific raw instrument names and canonical classes.
//!
//! Each canonical class (the model's prediction target) covers a set of raw
//! label variants as they appear in the source corpora. Class indices are
//! assigned by sorted class-name order, so they are reproducible across
//! processes without any persisted state.

use crate::error::{CoreError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Classification table bundled with the crate.
///
/// The table is an explicitly injected local resource; constructing the map
/// never touches the network.
const BUNDLED_CLASS_MAP: &str = include_str!("../data/class_map.json");

/// Bidirectional map between raw instrument labels and canonical classes.
///
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct InstrumentClassMap {
    /// `canonical_class -> raw label variants`, as loaded.
    forward: BTreeMap<String, Vec<String>>,
    /// `raw_label -> canonical_class`, derived. Injective by construction.
    reverse: BTreeMap<String, String>,
    /// `canonical_class -> dense index`, assigned by sorted class-name order.
    index: BTreeMap<String, usize>,
    /// Sorted class names; position equals the class index.
    classes: Vec<String>,
}

impl InstrumentClassMap {
    /// Build the map from an in-memory classification table.
    ///
    /// # Errors
    /// Fails if the table is empty, a class has no variants, or a raw label
    /// is listed under two different classes (ambiguity is rejected rather
    /// than resolved by overwrite).
    pub fn from_table(forward: BTreeMap<String, Vec<String>>) -> Result<Self> {
        if forward.is_empty() {
            return Err(CoreError::ClassMap("class table is empty".to_string()));
        }

        let mut reverse: BTreeMap<String, String> = BTreeMap::new();
        for (class, variants) in &forward {
            if variants.is_empty() {
                return Err(CoreError::ClassMap(format!(
                    "class {class:?} has no raw label variants"
                )));
            }
            for raw in variants {
                if let Some(existing) = reverse.get(raw) {
                    if existing != class {
                        return Err(CoreError::AmbiguousLabel {
                            label: raw.clone(),
                            first: existing.clone(),
                            second: class.clone(),
                        });
                    }
                }
                reverse.insert(raw.clone(), class.clone());
            }
        }

        // BTreeMap iteration order is the sorted class-name order.
        let classes: Vec<String> = forward.keys().cloned().collect();
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self { forward, reverse, index, classes })
    }

    /// Load the map from a JSON table `{"class": ["variant", ...], ...}`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let forward: BTreeMap<String, Vec<String>> = serde_json::from_slice(&bytes)?;
        Self::from_table(forward)
    }

    /// The default classification table shipped with the crate.
    pub fn bundled() -> Result<Self> {
        let forward: BTreeMap<String, Vec<String>> = serde_json::from_str(BUNDLED_CLASS_MAP)?;
        Self::from_table(forward)
    }

    /// Canonical class for a raw label, or `None` if the label is unmapped.
    ///
    /// Unknown labels are not an error; callers treat them as "skip".
    #[must_use]
    pub fn lookup(&self, raw_label: &str) -> Option<&str> {
        self.reverse.get(raw_label).map(String::as_str)
    }

    /// Dense class index for a raw label.
    ///
    /// Stricter contract than [`lookup`](Self::lookup): an unmapped label is
    /// an error here.
    pub fn index_of(&self, raw_label: &str) -> Result<usize> {
        let class = self
            .lookup(raw_label)
            .ok_or_else(|| CoreError::UnknownLabel(raw_label.to_string()))?;
        Ok(self.index[class])
    }

    /// Canonical class name for a dense index.
    pub fn class_from_index(&self, index: usize) -> Result<&str> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or(CoreError::UnknownIndex(index))
    }

    /// All raw labels known to the map, sorted.
    #[must_use]
    pub fn all_known_labels(&self) -> Vec<&str> {
        self.reverse.keys().map(String::as_str).collect()
    }

    /// All canonical class names, sorted. Position equals class index.
    #[must_use]
    pub fn all_classes(&self) -> &[String] {
        &self.classes
    }

    /// Raw label variants for one canonical class.
    #[must_use]
    pub fn variants(&self, class: &str) -> Option<&[String]> {
        self.forward.get(class).map(Vec::as_slice)
    }

    /// Number of canonical classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
