//! Consecutive rejection counters.
//!
//! One row per (feed, connection); the feed-wide counter is stored with an
//! empty connection id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{from_millis, to_millis, DbPool};
use crate::{RelayError, Result};

/// Connection id stored for feed-scoped counters.
const FEED_SCOPE: &str = "";

/// Stored connection id of a scope.
///
/// An empty connection id would share the feed-wide row, so it is refused.
fn scope_key(connection_id: Option<&str>) -> Result<&str> {
    match connection_id {
        None => Ok(FEED_SCOPE),
        Some(id) if id.trim().is_empty() => Err(RelayError::Validation(
            "connection id must not be empty".to_string(),
        )),
        Some(id) => Ok(id),
    }
}

/// A consecutive-rejection counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRetryRecord {
    pub feed_id: String,
    /// None for the feed-wide counter.
    pub connection_id: Option<String>,
    pub attempts_so_far: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for retry counters.
#[async_trait]
pub trait RetryRecordRepository: Send + Sync {
    /// Add one attempt and return the new count.
    async fn increment(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    /// Get a counter.
    async fn get(&self, feed_id: &str, connection_id: Option<&str>)
        -> Result<Option<FeedRetryRecord>>;

    /// Set every counter of a feed back to zero.
    async fn reset_feed(&self, feed_id: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Delete every counter of a feed.
    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64>;
}

/// Row type for retry records from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct RetryRecordRow {
    feed_id: String,
    connection_id: String,
    attempts_so_far: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<RetryRecordRow> for FeedRetryRecord {
    fn from(row: RetryRecordRow) -> Self {
        FeedRetryRecord {
            feed_id: row.feed_id,
            connection_id: Some(row.connection_id).filter(|c| !c.is_empty()),
            attempts_so_far: row.attempts_so_far,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

/// SQLite-backed retry record repository.
#[derive(Clone)]
pub struct SqlRetryRecordRepository {
    pool: DbPool,
}

impl SqlRetryRecordRepository {
    /// Create a new repository instance.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetryRecordRepository for SqlRetryRecordRepository {
    async fn increment(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let scope = scope_key(connection_id)?;
        let attempts: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feed_retry_records
                (feed_id, connection_id, attempts_so_far, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(feed_id, connection_id) DO UPDATE SET
                attempts_so_far = attempts_so_far + 1,
                updated_at = excluded.updated_at
            RETURNING attempts_so_far
            "#,
        )
        .bind(feed_id)
        .bind(scope)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(attempts)
    }

    async fn get(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
    ) -> Result<Option<FeedRetryRecord>> {
        let scope = scope_key(connection_id)?;
        let row = sqlx::query_as::<_, RetryRecordRow>(
            r#"
            SELECT feed_id, connection_id, attempts_so_far, created_at, updated_at
            FROM feed_retry_records
            WHERE feed_id = ? AND connection_id = ?
            "#,
        )
        .bind(feed_id)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(row.map(FeedRetryRecord::from))
    }

    async fn reset_feed(&self, feed_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE feed_retry_records
            SET attempts_so_far = 0, updated_at = ?
            WHERE feed_id = ? AND attempts_so_far > 0
            "#,
        )
        .bind(to_millis(now))
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_by_feed(&self, feed_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM feed_retry_records WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup_repo() -> SqlRetryRecordRepository {
        let db = Database::open_in_memory().await.unwrap();
        SqlRetryRecordRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_increment_per_scope() {
        let repo = setup_repo().await;
        let now = Utc::now();

        assert_eq!(repo.increment("f", None, now).await.unwrap(), 1);
        assert_eq!(repo.increment("f", None, now).await.unwrap(), 2);
        assert_eq!(repo.increment("f", Some("c1"), now).await.unwrap(), 1);

        let feed = repo.get("f", None).await.unwrap().unwrap();
        assert_eq!(feed.attempts_so_far, 2);
        assert_eq!(feed.connection_id, None);

        let conn = repo.get("f", Some("c1")).await.unwrap().unwrap();
        assert_eq!(conn.attempts_so_far, 1);
        assert_eq!(conn.connection_id.as_deref(), Some("c1"));

        assert!(repo.get("f", Some("c2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_connection_id_is_refused() {
        let repo = setup_repo().await;
        let now = Utc::now();

        repo.increment("f", None, now).await.unwrap();
        let result = repo.increment("f", Some(""), now).await;
        assert!(matches!(result, Err(RelayError::Validation(_))));
        assert!(repo.get("f", Some("")).await.is_err());

        let feed = repo.get("f", None).await.unwrap().unwrap();
        assert_eq!(feed.attempts_so_far, 1);
    }

    #[tokio::test]
    async fn test_reset_feed() {
        let repo = setup_repo().await;
        let now = Utc::now();

        repo.increment("f", None, now).await.unwrap();
        repo.increment("f", Some("c1"), now).await.unwrap();
        repo.increment("g", None, now).await.unwrap();

        assert_eq!(repo.reset_feed("f", now).await.unwrap(), 2);
        assert_eq!(repo.get("f", None).await.unwrap().unwrap().attempts_so_far, 0);
        assert_eq!(repo.get("f", Some("c1")).await.unwrap().unwrap().attempts_so_far, 0);
        assert_eq!(repo.get("g", None).await.unwrap().unwrap().attempts_so_far, 1);

        // Counting starts over
        assert_eq!(repo.increment("f", None, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_feed() {
        let repo = setup_repo().await;
        let now = Utc::now();

        repo.increment("f", None, now).await.unwrap();
        repo.increment("f", Some("c1"), now).await.unwrap();

        assert_eq!(repo.delete_by_feed("f").await.unwrap(), 2);
        assert!(repo.get("f", None).await.unwrap().is_none());
    }
}
