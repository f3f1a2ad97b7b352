// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Idempotent artifact loaders
//!
//! A loader transfers one batch of producer artifacts into the warehouse.
//! Artifacts are enumerated deterministically (date partition, then file
//! name), each commits atomically, and identity is the natural key, so
//! re-running a batch never duplicates or loses rows.

mod detections;
mod messages;

pub use detections::DetectionLoader;
pub use messages::MessageLoader;

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::errors::TeleflowResult;

/// What one `load` call did
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    /// Artifacts enumerated under the source root
    pub artifacts_seen: usize,
    /// Artifacts skipped because their fingerprint was already committed
    pub artifacts_unchanged: usize,
    /// Rows upserted into the destination
    pub rows_written: u64,
    /// Malformed records skipped inside tolerated artifacts
    pub records_skipped: usize,
    /// One entry per skipped record
    pub warnings: Vec<String>,
}

impl LoadReport {
    /// One-line summary recorded as the stage output
    pub fn summary(&self) -> String {
        format!(
            "{} artifact(s) seen, {} unchanged, {} row(s) written, {} record(s) skipped",
            self.artifacts_seen, self.artifacts_unchanged, self.rows_written, self.records_skipped
        )
    }
}

/// Date partitions under `root`, sorted ascending.
///
/// Directories that do not look like `YYYY-MM-DD` are ignored with a
/// warning; a missing root yields an empty batch (the producer wrote
/// nothing yet).
pub(crate) fn date_partitions(root: &Path) -> TeleflowResult<Vec<(NaiveDate, PathBuf)>> {
    let pattern = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex");

    if !root.exists() {
        tracing::warn!(root = %root.display(), "source root does not exist; empty batch");
        return Ok(Vec::new());
    }

    let mut partitions = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !pattern.is_match(&name) {
            tracing::warn!(dir = %name, "ignoring non-date partition directory");
            continue;
        }

        match NaiveDate::parse_from_str(&name, "%Y-%m-%d") {
            Ok(date) => partitions.push((date, entry.path())),
            Err(_) => {
                tracing::warn!(dir = %name, "ignoring unparseable partition directory");
            }
        }
    }

    partitions.sort_by_key(|(date, _)| *date);
    Ok(partitions)
}

/// Files matching `pattern` directly under `dir`, sorted by name.
pub(crate) fn sorted_files(dir: &Path, pattern: &str) -> TeleflowResult<Vec<PathBuf>> {
    let full_pattern = dir.join(pattern).to_string_lossy().into_owned();

    let mut files: Vec<PathBuf> = glob::glob(&full_pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();

    files.sort();
    Ok(files)
}

/// True when the malformation rate stays within the configured tolerance.
pub(crate) fn within_threshold(malformed: usize, total: usize, threshold: f64) -> bool {
    if total == 0 || malformed == 0 {
        return true;
    }
    (malformed as f64 / total as f64) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_date_partitions_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("2026-08-07")).unwrap();
        fs::create_dir(dir.path().join("2026-08-05")).unwrap();
        fs::create_dir(dir.path().join("images")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let partitions = date_partitions(dir.path()).unwrap();
        let dates: Vec<String> = partitions.iter().map(|(d, _)| d.to_string()).collect();
        assert_eq!(dates, vec!["2026-08-05", "2026-08-07"]);
    }

    #[test]
    fn test_missing_root_is_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let partitions = date_partitions(&dir.path().join("nope")).unwrap();
        assert!(partitions.is_empty());
    }

    #[test]
    fn test_sorted_files_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tikvahpharma.json"), "[]").unwrap();
        fs::write(dir.path().join("chemed.json"), "[]").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = sorted_files(dir.path(), "*.json").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chemed.json", "tikvahpharma.json"]);
    }

    #[test]
    fn test_within_threshold_boundaries() {
        assert!(within_threshold(0, 0, 0.0));
        assert!(within_threshold(0, 10, 0.0));
        assert!(within_threshold(2, 10, 0.2));
        assert!(!within_threshold(3, 10, 0.2));
        assert!(!within_threshold(1, 1, 0.5));
    }
}
