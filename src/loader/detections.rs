// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Detection loader
//!
//! Reads the per-day CSV batches the detector produces under
//! `<root>/<YYYY-MM-DD>/*.csv` and upserts them keyed by
//! `(image_path, detected_class)`. The image category is derived here from
//! each image's distinct classes; the collaborator's own category column is
//! ignored.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use super::{date_partitions, sorted_files, within_threshold, LoadReport};
use crate::classify::ImageClassifier;
use crate::errors::{TeleflowError, TeleflowResult};
use crate::warehouse::{ArtifactStamp, DetectionRecord, WarehouseSink};

const REQUIRED_COLUMNS: [&str; 5] = [
    "message_id",
    "channel_name",
    "image_path",
    "detected_class",
    "confidence",
];

/// Idempotent loader for detection batches
pub struct DetectionLoader {
    sink: Arc<dyn WarehouseSink>,
    classifier: ImageClassifier,
    malformed_threshold: f64,
}

/// One well-formed CSV row before category derivation
struct ParsedDetection {
    message_id: Option<i64>,
    channel_name: String,
    image_path: String,
    /// Empty for the zero-detection summary row
    detected_class: String,
    confidence: f64,
}

impl DetectionLoader {
    pub fn new(
        sink: Arc<dyn WarehouseSink>,
        classifier: ImageClassifier,
        malformed_threshold: f64,
    ) -> Self {
        Self {
            sink,
            classifier,
            malformed_threshold,
        }
    }

    /// Load every detection artifact under `source_root`.
    pub async fn load(&self, source_root: &Path) -> TeleflowResult<LoadReport> {
        let mut report = LoadReport::default();

        for (date, dir) in date_partitions(source_root)? {
            for file in sorted_files(&dir, "*.csv")? {
                let stem = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let key = format!("detections/{date}/{stem}");

                report.artifacts_seen += 1;
                self.load_artifact(&file, &key, date, &mut report).await?;
            }
        }

        tracing::info!(summary = %report.summary(), "detection load complete");
        Ok(report)
    }

    async fn load_artifact(
        &self,
        file: &Path,
        key: &str,
        detection_date: NaiveDate,
        report: &mut LoadReport,
    ) -> TeleflowResult<()> {
        let bytes = std::fs::read(file).map_err(|e| TeleflowError::FileReadError {
            path: file.to_path_buf(),
            error: e.to_string(),
        })?;

        let fingerprint = blake3::hash(&bytes).to_hex().to_string();
        if self.sink.last_fingerprint(key).await?.as_deref() == Some(fingerprint.as_str()) {
            tracing::debug!(artifact = key, "unchanged artifact, skipping");
            report.artifacts_unchanged += 1;
            return Ok(());
        }

        let mut reader = csv::Reader::from_reader(bytes.as_slice());

        let headers = reader.headers()?.clone();
        let columns: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name, idx))
            .collect();

        for required in REQUIRED_COLUMNS {
            if !columns.contains_key(required) {
                return Err(TeleflowError::Csv {
                    message: format!("artifact '{key}' is missing column '{required}'"),
                });
            }
        }

        let mut parsed = Vec::new();
        let mut malformed = 0usize;
        let mut total = 0usize;

        for (idx, result) in reader.records().enumerate() {
            total += 1;

            let outcome = result
                .map_err(|e| e.to_string())
                .and_then(|record| parse_detection(&record, &columns));

            match outcome {
                Ok(row) => parsed.push(row),
                Err(reason) => {
                    malformed += 1;
                    let warning = format!("{key}: record {idx} skipped: {reason}");
                    tracing::warn!(artifact = key, record = idx, %reason, "skipping record");
                    report.warnings.push(warning);
                }
            }
        }

        if !within_threshold(malformed, total, self.malformed_threshold) {
            return Err(TeleflowError::LoadValidationFailure {
                artifact: key.to_string(),
                malformed,
                total,
                threshold: self.malformed_threshold,
            });
        }

        let rows = self.derive_categories(parsed, detection_date);

        let stamp = ArtifactStamp {
            key: key.to_string(),
            fingerprint,
        };
        let written = self.sink.commit_detections(&stamp, &rows).await?;

        report.rows_written += written;
        report.records_skipped += malformed;
        Ok(())
    }

    /// Derive each image's category from its distinct detected classes and
    /// stamp it onto every row of that image.
    fn derive_categories(
        &self,
        parsed: Vec<ParsedDetection>,
        detection_date: NaiveDate,
    ) -> Vec<DetectionRecord> {
        let mut classes_by_image: BTreeMap<String, HashSet<String>> = BTreeMap::new();
        for row in &parsed {
            let classes = classes_by_image.entry(row.image_path.clone()).or_default();
            if !row.detected_class.is_empty() {
                classes.insert(row.detected_class.clone());
            }
        }

        parsed
            .into_iter()
            .map(|row| {
                let classes = &classes_by_image[&row.image_path];
                let category = self.classifier.classify(classes.iter().map(String::as_str));

                DetectionRecord {
                    message_id: row.message_id,
                    channel_name: row.channel_name,
                    image_path: row.image_path,
                    detected_class: row.detected_class,
                    confidence: row.confidence,
                    image_category: category,
                    detection_date,
                }
            })
            .collect()
    }
}

fn field<'a>(
    record: &'a csv::StringRecord,
    columns: &HashMap<&str, usize>,
    name: &str,
) -> &'a str {
    columns
        .get(name)
        .and_then(|&idx| record.get(idx))
        .unwrap_or("")
        .trim()
}

fn parse_detection(
    record: &csv::StringRecord,
    columns: &HashMap<&str, usize>,
) -> Result<ParsedDetection, String> {
    let channel_name = field(record, columns, "channel_name");
    if channel_name.is_empty() {
        return Err("missing channel_name".into());
    }

    let image_path = field(record, columns, "image_path");
    if image_path.is_empty() {
        return Err("missing image_path".into());
    }

    let message_id = match field(record, columns, "message_id") {
        "" => None,
        raw => Some(
            raw.parse::<i64>()
                .map_err(|_| format!("unparseable message_id '{raw}'"))?,
        ),
    };

    let raw_confidence = field(record, columns, "confidence");
    let confidence: f64 = raw_confidence
        .parse()
        .map_err(|_| format!("unparseable confidence '{raw_confidence}'"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }

    Ok(ParsedDetection {
        message_id,
        channel_name: channel_name.to_string(),
        image_path: image_path.to_string(),
        detected_class: field(record, columns, "detected_class").to_string(),
        confidence,
    })
}
