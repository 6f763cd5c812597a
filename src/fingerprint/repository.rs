//! Fingerprint persistence.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};

use super::types::FieldFingerprint;
use crate::db::{to_millis, DbPool};
use crate::{RelayError, Result};

/// Bound parameters per statement, below SQLite's variable limit.
const BATCH_SIZE: usize = 200;

/// Storage for field fingerprints.
#[async_trait]
pub trait FingerprintRepository: Send + Sync {
    /// Return the subset of `values` already stored for a feed field.
    async fn find_existing(
        &self,
        feed_id: &str,
        field_name: &str,
        values: &[String],
    ) -> Result<HashSet<String>>;

    /// Whether any fingerprint exists for a feed field.
    async fn has_field(&self, feed_id: &str, field_name: &str) -> Result<bool>;

    /// Insert fingerprints, ignoring ones already stored.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_many(&self, fingerprints: &[FieldFingerprint]) -> Result<u64>;

    /// Delete every fingerprint of a feed.
    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64>;
}

/// SQLite-backed fingerprint repository.
#[derive(Clone)]
pub struct SqlFingerprintRepository {
    pool: DbPool,
}

impl SqlFingerprintRepository {
    /// Create a new repository instance.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FingerprintRepository for SqlFingerprintRepository {
    async fn find_existing(
        &self,
        feed_id: &str,
        field_name: &str,
        values: &[String],
    ) -> Result<HashSet<String>> {
        let mut found = HashSet::new();

        for chunk in values.chunks(BATCH_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT field_value FROM article_fingerprints WHERE feed_id = ",
            );
            builder.push_bind(feed_id);
            builder.push(" AND field_name = ");
            builder.push_bind(field_name);
            builder.push(" AND field_value IN (");
            let mut separated = builder.separated(", ");
            for value in chunk {
                separated.push_bind(value);
            }
            separated.push_unseparated(")");

            let rows: Vec<String> = builder
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RelayError::Database(e.to_string()))?;
            found.extend(rows);
        }

        Ok(found)
    }

    async fn has_field(&self, feed_id: &str, field_name: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM article_fingerprints WHERE feed_id = ? AND field_name = ? LIMIT 1",
        )
        .bind(feed_id)
        .bind(field_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn insert_many(&self, fingerprints: &[FieldFingerprint]) -> Result<u64> {
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in fingerprints.chunks(BATCH_SIZE / 5) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO article_fingerprints \
                 (feed_id, field_name, field_value, is_hashed, created_at) ",
            );
            builder.push_values(chunk, |mut row, fp| {
                row.push_bind(&fp.feed_id)
                    .push_bind(&fp.field_name)
                    .push_bind(&fp.field_value)
                    .push_bind(fp.is_hashed)
                    .push_bind(to_millis(fp.created_at));
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| RelayError::Database(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM article_fingerprints WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
