//! SQLite-backed reservations for coordination across processes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{Limits, RateLimitBackend, Reservation, ReservationId, DAILY_WINDOW_SECS};
use crate::db::{to_millis, DbPool};
use crate::{RelayError, Result};

/// Reservation backend stored in the `rate_limit_reservations` table.
#[derive(Clone)]
pub struct SqlRateLimitBackend {
    pool: DbPool,
}

impl SqlRateLimitBackend {
    /// Create a new backend over a pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitBackend for SqlRateLimitBackend {
    /// Insert first, then count including the new row.
    ///
    /// The insert takes SQLite's write lock, so concurrent reservations
    /// serialize instead of both passing the check.
    async fn reserve(
        &self,
        feed_id: &str,
        connection_id: &str,
        limits: &Limits,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_reservations (feed_id, connection_id, reserved_at)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(connection_id)
        .bind(to_millis(now))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        let day_cutoff = now - Duration::seconds(DAILY_WINDOW_SECS);
        let daily_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rate_limit_reservations WHERE feed_id = ? AND reserved_at > ?",
        )
        .bind(feed_id)
        .bind(to_millis(day_cutoff))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        if daily_count > limits.daily as i64 {
            tx.rollback().await?;
            debug!("Feed {} reached its daily limit of {}", feed_id, limits.daily);
            return Ok(Reservation::DailyLimitExceeded);
        }

        for limit in &limits.connection {
            let count: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM rate_limit_reservations
                WHERE feed_id = ? AND connection_id = ? AND reserved_at > ?
                "#,
            )
            .bind(feed_id)
            .bind(connection_id)
            .bind(to_millis(limit.window_start(now)))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

            if count > limit.limit as i64 {
                tx.rollback().await?;
                debug!(
                    "Connection {} of feed {} reached limit {}",
                    connection_id, feed_id, limit.id
                );
                return Ok(Reservation::ConnectionLimitExceeded {
                    limit_id: limit.id.clone(),
                });
            }
        }

        tx.commit().await?;
        Ok(Reservation::Allowed { id })
    }

    async fn release(&self, id: ReservationId) -> Result<()> {
        sqlx::query("DELETE FROM rate_limit_reservations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_since(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = match connection_id {
            Some(connection_id) => sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM rate_limit_reservations
                WHERE feed_id = ? AND connection_id = ? AND reserved_at > ?
                "#,
            )
            .bind(feed_id)
            .bind(connection_id)
            .bind(to_millis(since))
            .fetch_one(&self.pool)
            .await,
            None => sqlx::query_scalar(
                "SELECT COUNT(*) FROM rate_limit_reservations WHERE feed_id = ? AND reserved_at > ?",
            )
            .bind(feed_id)
            .bind(to_millis(since))
            .fetch_one(&self.pool)
            .await,
        }
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_reservations WHERE reserved_at < ?")
            .bind(to_millis(before))
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn purge(&self, feed_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_reservations WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
