//! Delivery record persistence.

use std::collections::HashSet;

use async_trait::async_trait;

use super::types::{DeliveryRecord, DeliveryStatus, ErrorCode};
use crate::db::{from_millis, to_millis, DbPool};
use crate::{RelayError, Result};

/// Storage for delivery records.
#[async_trait]
pub trait DeliveryRecordRepository: Send + Sync {
    /// Insert a record.
    ///
    /// Returns false when a record for the same (event, connection, article)
    /// already exists; the existing row is left untouched.
    async fn insert(&self, record: &DeliveryRecord) -> Result<bool>;

    /// (connection id, article id hash) pairs already recorded for an event.
    async fn recorded_for_event(&self, event_id: &str) -> Result<HashSet<(String, String)>>;

    /// Most recent records of a feed, newest first.
    async fn list_by_feed(&self, feed_id: &str, limit: i64) -> Result<Vec<DeliveryRecord>>;

    /// Every record of an article across feeds and connections.
    async fn list_by_article(&self, article_id_hash: &str) -> Result<Vec<DeliveryRecord>>;

    /// Count a feed's records with the given status.
    async fn count_by_status(&self, feed_id: &str, status: DeliveryStatus) -> Result<u64>;

    /// Delete every record of a feed.
    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64>;
}

/// Row type for delivery records from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DeliveryRecordRow {
    id: String,
    event_id: String,
    feed_id: String,
    connection_id: String,
    article_id_hash: String,
    status: String,
    error_code: Option<String>,
    internal_message: Option<String>,
    created_at: i64,
}

impl TryFrom<DeliveryRecordRow> for DeliveryRecord {
    type Error = RelayError;

    fn try_from(row: DeliveryRecordRow) -> Result<Self> {
        let status = row.status.parse().map_err(RelayError::Database)?;
        let error_code = row
            .error_code
            .as_deref()
            .map(str::parse::<ErrorCode>)
            .transpose()
            .map_err(RelayError::Database)?;

        Ok(DeliveryRecord {
            id: row.id,
            event_id: row.event_id,
            feed_id: row.feed_id,
            connection_id: row.connection_id,
            article_id_hash: row.article_id_hash,
            status,
            error_code,
            internal_message: row.internal_message,
            created_at: from_millis(row.created_at),
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, event_id, feed_id, connection_id, article_id_hash, \
     status, error_code, internal_message, created_at FROM delivery_records";

/// SQLite-backed delivery record repository.
#[derive(Clone)]
pub struct SqlDeliveryRecordRepository {
    pool: DbPool,
}

impl SqlDeliveryRecordRepository {
    /// Create a new repository instance.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRecordRepository for SqlDeliveryRecordRepository {
    async fn insert(&self, record: &DeliveryRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO delivery_records
                (id, event_id, feed_id, connection_id, article_id_hash,
                 status, error_code, internal_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.event_id)
        .bind(&record.feed_id)
        .bind(&record.connection_id)
        .bind(&record.article_id_hash)
        .bind(record.status.as_str())
        .bind(record.error_code.map(|c| c.as_str()))
        .bind(&record.internal_message)
        .bind(to_millis(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn recorded_for_event(&self, event_id: &str) -> Result<HashSet<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT connection_id, article_id_hash FROM delivery_records WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    async fn list_by_feed(&self, feed_id: &str, limit: i64) -> Result<Vec<DeliveryRecord>> {
        let query = format!("{SELECT_COLUMNS} WHERE feed_id = ? ORDER BY created_at DESC, id LIMIT ?");
        let rows = sqlx::query_as::<_, DeliveryRecordRow>(&query)
            .bind(feed_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }

    async fn list_by_article(&self, article_id_hash: &str) -> Result<Vec<DeliveryRecord>> {
        let query = format!("{SELECT_COLUMNS} WHERE article_id_hash = ? ORDER BY created_at ASC");
        let rows = sqlx::query_as::<_, DeliveryRecordRow>(&query)
            .bind(article_id_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }

    async fn count_by_status(&self, feed_id: &str, status: DeliveryStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM delivery_records WHERE feed_id = ? AND status = ?",
        )
        .bind(feed_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_records WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
