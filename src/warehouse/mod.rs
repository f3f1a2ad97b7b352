// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Warehouse sink
//!
//! Destination rows and the sink trait loaders write through. One artifact
//! commits atomically: its rows and its fingerprint ledger entry land in the
//! same unit of work, or not at all.

mod postgres;

pub use postgres::PgWarehouse;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::classify::ImageCategory;
use crate::errors::TeleflowResult;

/// Deduplicated message row, keyed by `message_id`
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub message_id: i64,
    pub channel_name: String,
    pub message_date: Option<DateTime<Utc>>,
    pub message_text: String,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub has_media: bool,
    pub image_path: Option<String>,
}

/// Deduplicated detection row, keyed by `(image_path, detected_class)`.
///
/// `detected_class` is empty for the summary row an image with zero
/// detections produces.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub message_id: Option<i64>,
    pub channel_name: String,
    pub image_path: String,
    pub detected_class: String,
    pub confidence: f64,
    pub image_category: ImageCategory,
    pub detection_date: NaiveDate,
}

/// Identity and content fingerprint of one artifact
#[derive(Debug, Clone)]
pub struct ArtifactStamp {
    /// Natural partition key, e.g. `messages/2026-08-07/chemed`
    pub key: String,
    /// BLAKE3 hex digest of the artifact file
    pub fingerprint: String,
}

/// Destination storage the loaders write through.
///
/// `commit_*` is atomic per artifact and upserts by natural key, so loading
/// the same artifact any number of times converges to the same row set.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Create the schema and destination tables if absent
    async fn ensure_schema(&self) -> TeleflowResult<()>;

    /// Fingerprint recorded by the last successful commit of this artifact
    async fn last_fingerprint(&self, artifact_key: &str) -> TeleflowResult<Option<String>>;

    /// Atomically upsert one message artifact and its ledger entry
    async fn commit_messages(
        &self,
        stamp: &ArtifactStamp,
        rows: &[MessageRecord],
    ) -> TeleflowResult<u64>;

    /// Atomically upsert one detection artifact and its ledger entry
    async fn commit_detections(
        &self,
        stamp: &ArtifactStamp,
        rows: &[DetectionRecord],
    ) -> TeleflowResult<u64>;
}

/// In-memory sink for tests: same upsert and ledger semantics, no Postgres.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryWarehouse {
        inner: Mutex<MemoryState>,
    }

    #[derive(Default)]
    struct MemoryState {
        pub messages: HashMap<i64, MessageRecord>,
        pub detections: HashMap<(String, String), DetectionRecord>,
        pub ledger: HashMap<String, String>,
    }

    impl MemoryWarehouse {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn message_count(&self) -> usize {
            self.inner.lock().await.messages.len()
        }

        pub async fn detection_count(&self) -> usize {
            self.inner.lock().await.detections.len()
        }

        pub async fn message(&self, id: i64) -> Option<MessageRecord> {
            self.inner.lock().await.messages.get(&id).cloned()
        }

        pub async fn detections_for_image(&self, image_path: &str) -> Vec<DetectionRecord> {
            let state = self.inner.lock().await;
            let mut rows: Vec<_> = state
                .detections
                .values()
                .filter(|d| d.image_path == image_path)
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.detected_class.cmp(&b.detected_class));
            rows
        }

        /// Snapshot of message rows sorted by key, for idempotence checks
        pub async fn message_rows(&self) -> Vec<MessageRecord> {
            let state = self.inner.lock().await;
            let mut rows: Vec<_> = state.messages.values().cloned().collect();
            rows.sort_by_key(|r| r.message_id);
            rows
        }
    }

    #[async_trait]
    impl WarehouseSink for MemoryWarehouse {
        async fn ensure_schema(&self) -> TeleflowResult<()> {
            Ok(())
        }

        async fn last_fingerprint(&self, artifact_key: &str) -> TeleflowResult<Option<String>> {
            Ok(self.inner.lock().await.ledger.get(artifact_key).cloned())
        }

        async fn commit_messages(
            &self,
            stamp: &ArtifactStamp,
            rows: &[MessageRecord],
        ) -> TeleflowResult<u64> {
            let mut state = self.inner.lock().await;
            for row in rows {
                state.messages.insert(row.message_id, row.clone());
            }
            state
                .ledger
                .insert(stamp.key.clone(), stamp.fingerprint.clone());
            Ok(rows.len() as u64)
        }

        async fn commit_detections(
            &self,
            stamp: &ArtifactStamp,
            rows: &[DetectionRecord],
        ) -> TeleflowResult<u64> {
            let mut state = self.inner.lock().await;
            for row in rows {
                state.detections.insert(
                    (row.image_path.clone(), row.detected_class.clone()),
                    row.clone(),
                );
            }
            state
                .ledger
                .insert(stamp.key.clone(), stamp.fingerprint.clone());
            Ok(rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_memory_upsert_by_natural_key() {
        let sink = MemoryWarehouse::new();
        let stamp = ArtifactStamp {
            key: "messages/2026-08-07/chemed".into(),
            fingerprint: "abc".into(),
        };
        let row = MessageRecord {
            message_id: 1,
            channel_name: "chemed".into(),
            message_date: None,
            message_text: "hi".into(),
            views: Some(5),
            forwards: None,
            has_media: false,
            image_path: None,
        };

        sink.commit_messages(&stamp, &[row.clone()]).await.unwrap();
        sink.commit_messages(&stamp, &[row]).await.unwrap();

        assert_eq!(sink.message_count().await, 1);
        assert_eq!(
            sink.last_fingerprint("messages/2026-08-07/chemed")
                .await
                .unwrap()
                .as_deref(),
            Some("abc")
        );
    }
}
