//! Idempotent measurement store.
//!
//! Rows are keyed by `(document_id, measurement_code, result_index)`. An
//! upsert writes a document's whole batch in one transaction under a
//! per-document lock, so concurrent ingestion of the same document
//! serializes and a failed batch leaves no partial rows behind.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::models::{DocumentMeta, MeasurementRecord, StoredMeasurement};

/// Async mutexes keyed by document id, created on demand.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `document_id`, dropping entries nobody holds.
    pub fn lock_for(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MeasurementStore {
    pool: SqlitePool,
    locks: DocumentLocks,
}

impl MeasurementStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: DocumentLocks::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts or overwrites every record of one document atomically.
    ///
    /// Returns the number of rows written. An empty batch writes nothing.
    pub async fn upsert(
        &self,
        meta: &DocumentMeta,
        records: &[MeasurementRecord],
    ) -> Result<u64, StoreError> {
        if meta.document_id.trim().is_empty() {
            return Err(StoreError::EmptyDocumentId);
        }
        if records.is_empty() {
            return Ok(0);
        }

        let lock = self.locks.lock_for(&meta.document_id);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO measurements (document_id, provider, patient_id, exam_id, acquisition_time,
                                          measurement_name, measurement_code, result_index, value)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(document_id, measurement_code, result_index) DO UPDATE SET
                    provider = excluded.provider,
                    patient_id = excluded.patient_id,
                    exam_id = excluded.exam_id,
                    acquisition_time = excluded.acquisition_time,
                    measurement_name = excluded.measurement_name,
                    value = excluded.value
                "#,
            )
            .bind(&meta.document_id)
            .bind(&meta.provider)
            .bind(&meta.patient_id)
            .bind(&meta.exam_id)
            .bind(&meta.acquisition_time)
            .bind(&record.measurement_name)
            .bind(&record.measurement_code)
            .bind(record.result_index)
            .bind(record.value)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// All rows for a document, ordered by code then result index.
    pub async fn measurements_for(
        &self,
        document_id: &str,
    ) -> Result<Vec<StoredMeasurement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, provider, patient_id, exam_id, acquisition_time,
                   measurement_name, measurement_code, result_index, value
            FROM measurements
            WHERE document_id = ?
            ORDER BY measurement_code ASC, result_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredMeasurement {
                id: row.get("id"),
                document_id: row.get("document_id"),
                provider: row.get("provider"),
                patient_id: row.get("patient_id"),
                exam_id: row.get("exam_id"),
                acquisition_time: row.get("acquisition_time"),
                measurement_name: row.get("measurement_name"),
                measurement_code: row.get("measurement_code"),
                result_index: row.get("result_index"),
                value: row.get("value"),
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?)
    }
}
