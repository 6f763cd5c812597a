//! Durable per-feed processing leases.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{to_millis, DbPool};
use crate::{RelayError, Result};

/// Storage for feed leases.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Take the lease of a feed.
    ///
    /// Succeeds when the feed has no lease, the lease expired, or `holder`
    /// already holds it.
    async fn acquire(
        &self,
        feed_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Give the lease back. Returns false if `holder` did not hold it.
    async fn release(&self, feed_id: &str, holder: &str) -> Result<bool>;

    /// Drop the lease whoever holds it.
    async fn delete(&self, feed_id: &str) -> Result<u64>;
}

/// SQLite-backed lease repository.
#[derive(Clone)]
pub struct SqlLeaseRepository {
    pool: DbPool,
}

impl SqlLeaseRepository {
    /// Create a new repository instance.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseRepository for SqlLeaseRepository {
    async fn acquire(
        &self,
        feed_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let now_ms = to_millis(now);
        let expires_at = now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            INSERT INTO feed_leases (feed_id, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(feed_id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE feed_leases.expires_at <= ? OR feed_leases.holder = excluded.holder
            "#,
        )
        .bind(feed_id)
        .bind(holder)
        .bind(expires_at)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, feed_id: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed_leases WHERE feed_id = ? AND holder = ?")
            .bind(feed_id)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, feed_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM feed_leases WHERE feed_id = ?")
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

    const TTL: Duration = Duration::from_secs(60);

    async fn setup_repo() -> SqlLeaseRepository {
        let db = Database::open_in_memory().await.unwrap();
        SqlLeaseRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let repo = setup_repo().await;
        let now = Utc::now();

        assert!(repo.acquire("f", "a", now, TTL).await.unwrap());
        assert!(!repo.acquire("f", "b", now, TTL).await.unwrap());
        // Re-entrant for the same holder
        assert!(repo.acquire("f", "a", now, TTL).await.unwrap());
        // Other feeds are independent
        assert!(repo.acquire("g", "b", now, TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let repo = setup_repo().await;
        let now = Utc::now();

        assert!(repo.acquire("f", "a", now, TTL).await.unwrap());
        let later = now + chrono::Duration::seconds(61);
        assert!(repo.acquire("f", "b", later, TTL).await.unwrap());
        // The old holder lost it
        assert!(!repo.release("f", "a").await.unwrap());
        assert!(repo.release("f", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_and_delete() {
        let repo = setup_repo().await;
        let now = Utc::now();

        repo.acquire("f", "a", now, TTL).await.unwrap();
        assert!(repo.release("f", "a").await.unwrap());
        assert!(repo.acquire("f", "b", now, TTL).await.unwrap());

        assert_eq!(repo.delete("f").await.unwrap(), 1);
        assert!(repo.acquire("f", "c", now, TTL).await.unwrap());
    }
}
