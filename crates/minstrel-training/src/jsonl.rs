//! JSONL row tables: one serialized record per line.
//!
//! Loss histories, validation-search results, and predictions all use this
//! format so they can be appended to and inspected with line tools.

use crate::error::{Result, TrainingError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(line).map_err(|e| {
            TrainingError::Driver(format!(
                "failed to parse jsonl line {} of {}: {e}",
                idx + 1,
                path.display()
            ))
        })?;
        rows.push(row);
    }
    Ok(rows)
}
