// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Raw-message loader
//!
//! Reads the per-channel JSON batches the scraper produces under
//! `<root>/<YYYY-MM-DD>/<channel>.json` and upserts them keyed by
//! `message_id`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::{date_partitions, sorted_files, within_threshold, LoadReport};
use crate::errors::{TeleflowError, TeleflowResult};
use crate::warehouse::{ArtifactStamp, MessageRecord, WarehouseSink};

/// Idempotent loader for scraped message batches
pub struct MessageLoader {
    sink: Arc<dyn WarehouseSink>,
    malformed_threshold: f64,
}

impl MessageLoader {
    pub fn new(sink: Arc<dyn WarehouseSink>, malformed_threshold: f64) -> Self {
        Self {
            sink,
            malformed_threshold,
        }
    }

    /// Load every message artifact under `source_root`.
    pub async fn load(&self, source_root: &Path) -> TeleflowResult<LoadReport> {
        let mut report = LoadReport::default();

        for (date, dir) in date_partitions(source_root)? {
            for file in sorted_files(&dir, "*.json")? {
                let stem = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let key = format!("messages/{date}/{stem}");

                report.artifacts_seen += 1;
                self.load_artifact(&file, &key, &mut report).await?;
            }
        }

        tracing::info!(summary = %report.summary(), "message load complete");
        Ok(report)
    }

    async fn load_artifact(
        &self,
        file: &Path,
        key: &str,
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

        let values: Vec<Value> =
            serde_json::from_slice(&bytes).map_err(|_| TeleflowError::LoadValidationFailure {
                artifact: key.to_string(),
                malformed: 1,
                total: 1,
                threshold: self.malformed_threshold,
            })?;

        let total = values.len();
        let mut rows = Vec::with_capacity(total);
        let mut malformed = 0usize;

        for (idx, value) in values.iter().enumerate() {
            match parse_message(value) {
                Ok(row) => rows.push(row),
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

        let stamp = ArtifactStamp {
            key: key.to_string(),
            fingerprint,
        };
        let written = self.sink.commit_messages(&stamp, &rows).await?;

        report.rows_written += written;
        report.records_skipped += malformed;
        Ok(())
    }
}

/// Parse one scraped message object; the reason string becomes the warning.
fn parse_message(value: &Value) -> Result<MessageRecord, String> {
    let obj = value.as_object().ok_or("not a JSON object")?;

    let message_id = obj
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or("missing or non-integer message_id")?;

    let channel_name = obj
        .get("channel_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("missing channel_name")?
        .to_string();

    let message_text = obj
        .get("message_text")
        .and_then(Value::as_str)
        .ok_or("missing message_text")?
        .to_string();

    let message_date = match obj.get("message_date") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| format!("unparseable message_date '{s}'"))?,
        ),
        Some(_) => return Err("message_date is not a string".into()),
    };

    let views = optional_i64(obj, "views")?;
    let forwards = optional_i64(obj, "forwards")?;

    let has_media = match obj.get("has_media") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err("has_media is not a boolean".into()),
    };

    let image_path = match obj.get("image_path") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err("image_path is not a string".into()),
    };

    Ok(MessageRecord {
        message_id,
        channel_name,
        message_date,
        message_text,
        views,
        forwards,
        has_media,
        image_path,
    })
}

fn optional_i64(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<i64>, String> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("{field} is not an integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::testing::MemoryWarehouse;
    use serde_json::json;
    use std::fs;

    fn write_artifact(root: &Path, date: &str, channel: &str, body: &Value) {
        let dir = root.join(date);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{channel}.json")),
            serde_json::to_vec_pretty(body).unwrap(),
        )
        .unwrap();
    }

    fn message(id: i64, text: &str) -> Value {
        json!({
            "message_id": id,
            "channel_name": "chemed",
            "message_date": "2026-08-07T09:30:00+00:00",
            "message_text": text,
            "views": 120,
            "forwards": 3,
            "has_media": false,
            "image_path": null
        })
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(
            dir.path(),
            "2026-08-07",
            "chemed",
            &json!([message(1, "a"), message(2, "b")]),
        );

        let sink = Arc::new(MemoryWarehouse::new());
        let loader = MessageLoader::new(sink.clone(), 0.2);

        let first = loader.load(dir.path()).await.unwrap();
        assert_eq!(first.rows_written, 2);

        let rows_after_first = sink.message_rows().await;
        let second = loader.load(dir.path()).await.unwrap();

        assert_eq!(sink.message_rows().await, rows_after_first);
        assert_eq!(second.artifacts_unchanged, 1);
        assert_eq!(second.rows_written, 0);
    }

    #[tokio::test]
    async fn test_malformed_below_threshold_skips_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = message(3, "c");
        broken.as_object_mut().unwrap().remove("message_text");
        write_artifact(
            dir.path(),
            "2026-08-07",
            "chemed",
            &json!([message(1, "a"), message(2, "b"), broken]),
        );

        let sink = Arc::new(MemoryWarehouse::new());
        let loader = MessageLoader::new(sink.clone(), 0.5);

        let report = loader.load(dir.path()).await.unwrap();
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("message_text"));
        assert_eq!(sink.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_malformed_above_threshold_fails_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = message(2, "b");
        broken.as_object_mut().unwrap().remove("message_id");
        write_artifact(
            dir.path(),
            "2026-08-07",
            "chemed",
            &json!([message(1, "a"), broken]),
        );

        let sink = Arc::new(MemoryWarehouse::new());
        let loader = MessageLoader::new(sink.clone(), 0.2);

        let err = loader.load(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            TeleflowError::LoadValidationFailure { malformed: 1, total: 2, .. }
        ));
        // Nothing from the failing artifact is committed
        assert_eq!(sink.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_unparseable_file_fails_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let partition = dir.path().join("2026-08-07");
        fs::create_dir_all(&partition).unwrap();
        fs::write(partition.join("chemed.json"), b"{not json").unwrap();

        let sink = Arc::new(MemoryWarehouse::new());
        let loader = MessageLoader::new(sink, 0.2);

        let err = loader.load(dir.path()).await.unwrap_err();
        assert!(matches!(err, TeleflowError::LoadValidationFailure { .. }));
    }

    #[tokio::test]
    async fn test_reload_after_edit_overwrites_by_key() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "2026-08-07", "chemed", &json!([message(1, "old")]));

        let sink = Arc::new(MemoryWarehouse::new());
        let loader = MessageLoader::new(sink.clone(), 0.2);
        loader.load(dir.path()).await.unwrap();

        // Producer rewrote the artifact with corrected content
        write_artifact(dir.path(), "2026-08-07", "chemed", &json!([message(1, "new")]));
        loader.load(dir.path()).await.unwrap();

        assert_eq!(sink.message_count().await, 1);
        assert_eq!(sink.message(1).await.unwrap().message_text, "new");
    }

    #[test]
    fn test_parse_message_rejects_bad_views() {
        let mut value = message(1, "a");
        value["views"] = json!("many");
        let err = parse_message(&value).unwrap_err();
        assert!(err.contains("views"));
    }
}
