// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Postgres warehouse sink
//!
//! Writes through a bounded connection pool. Schema names cannot be bound as
//! parameters, so they are interpolated after validation against the
//! identifier pattern in config validation.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::{ArtifactStamp, DetectionRecord, MessageRecord, WarehouseSink};
use crate::config::DatabaseConfig;
use crate::errors::{TeleflowError, TeleflowResult};

/// Warehouse sink backed by a Postgres pool
pub struct PgWarehouse {
    pool: PgPool,
    schema: String,
}

impl PgWarehouse {
    /// Connect with a bounded pool and acquire timeout from config
    pub async fn connect(config: &DatabaseConfig, schema: &str) -> TeleflowResult<Self> {
        // Schema names are interpolated, not bound; refuse anything that is
        // not a plain identifier
        if !is_identifier(schema) {
            return Err(TeleflowError::InvalidConfig {
                reason: format!("schema '{schema}' is not a valid identifier"),
                help: Some("Use lowercase letters, digits, and underscores".into()),
            });
        }

        let url = config.url()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&url)
            .await?;

        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    /// Wrap an existing pool (tests, shared pools)
    pub fn with_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    fn write_failure(artifact: &str, e: sqlx::Error) -> TeleflowError {
        TeleflowError::LoadWriteFailure {
            artifact: artifact.to_string(),
            error: e.to_string(),
        }
    }
}

#[async_trait]
impl WarehouseSink for PgWarehouse {
    async fn ensure_schema(&self) -> TeleflowResult<()> {
        let schema = &self.schema;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.telegram_messages (
                message_id   BIGINT PRIMARY KEY,
                channel_name TEXT NOT NULL,
                message_date TIMESTAMPTZ,
                message_text TEXT NOT NULL,
                views        BIGINT,
                forwards     BIGINT,
                has_media    BOOLEAN NOT NULL DEFAULT FALSE,
                image_path   TEXT
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.image_detections (
                message_id     BIGINT,
                channel_name   TEXT NOT NULL,
                image_path     TEXT NOT NULL,
                detected_class TEXT NOT NULL,
                confidence     DOUBLE PRECISION NOT NULL,
                image_category TEXT NOT NULL,
                detection_date DATE NOT NULL,
                PRIMARY KEY (image_path, detected_class)
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.artifact_loads (
                artifact_key TEXT PRIMARY KEY,
                fingerprint  TEXT NOT NULL,
                rows_written BIGINT NOT NULL,
                loaded_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_fingerprint(&self, artifact_key: &str) -> TeleflowResult<Option<String>> {
        let row = sqlx::query(&format!(
            "SELECT fingerprint FROM {}.artifact_loads WHERE artifact_key = $1",
            self.schema
        ))
        .bind(artifact_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("fingerprint")))
    }

    async fn commit_messages(
        &self,
        stamp: &ArtifactStamp,
        rows: &[MessageRecord],
    ) -> TeleflowResult<u64> {
        let schema = &self.schema;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        let upsert = format!(
            r#"
            INSERT INTO {schema}.telegram_messages (
                message_id, channel_name, message_date, message_text,
                views, forwards, has_media, image_path
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (message_id) DO UPDATE SET
                channel_name = EXCLUDED.channel_name,
                message_date = EXCLUDED.message_date,
                message_text = EXCLUDED.message_text,
                views        = EXCLUDED.views,
                forwards     = EXCLUDED.forwards,
                has_media    = EXCLUDED.has_media,
                image_path   = EXCLUDED.image_path
            "#
        );

        for row in rows {
            sqlx::query(&upsert)
                .bind(row.message_id)
                .bind(&row.channel_name)
                .bind(row.message_date)
                .bind(&row.message_text)
                .bind(row.views)
                .bind(row.forwards)
                .bind(row.has_media)
                .bind(&row.image_path)
                .execute(&mut *tx)
                .await
                .map_err(|e| Self::write_failure(&stamp.key, e))?;
        }

        record_ledger(&mut tx, schema, stamp, rows.len() as u64)
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        tx.commit()
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        Ok(rows.len() as u64)
    }

    async fn commit_detections(
        &self,
        stamp: &ArtifactStamp,
        rows: &[DetectionRecord],
    ) -> TeleflowResult<u64> {
        let schema = &self.schema;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        let upsert = format!(
            r#"
            INSERT INTO {schema}.image_detections (
                message_id, channel_name, image_path, detected_class,
                confidence, image_category, detection_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (image_path, detected_class) DO UPDATE SET
                message_id     = EXCLUDED.message_id,
                channel_name   = EXCLUDED.channel_name,
                confidence     = EXCLUDED.confidence,
                image_category = EXCLUDED.image_category,
                detection_date = EXCLUDED.detection_date
            "#
        );

        for row in rows {
            sqlx::query(&upsert)
                .bind(row.message_id)
                .bind(&row.channel_name)
                .bind(&row.image_path)
                .bind(&row.detected_class)
                .bind(row.confidence)
                .bind(row.image_category.as_str())
                .bind(row.detection_date)
                .execute(&mut *tx)
                .await
                .map_err(|e| Self::write_failure(&stamp.key, e))?;
        }

        record_ledger(&mut tx, schema, stamp, rows.len() as u64)
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        tx.commit()
            .await
            .map_err(|e| Self::write_failure(&stamp.key, e))?;

        Ok(rows.len() as u64)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

async fn record_ledger(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    schema: &str,
    stamp: &ArtifactStamp,
    rows_written: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {schema}.artifact_loads (artifact_key, fingerprint, rows_written, loaded_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (artifact_key) DO UPDATE SET
            fingerprint  = EXCLUDED.fingerprint,
            rows_written = EXCLUDED.rows_written,
            loaded_at    = now()
        "#
    ))
    .bind(&stamp.key)
    .bind(&stamp.fingerprint)
    .bind(rows_written as i64)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
