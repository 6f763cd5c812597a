//! Delivery rate limiting.
//!
//! Two gates apply before an article is formatted and sent:
//!
//! - a per-feed daily cap over the trailing 24 hours, and
//! - per-connection custom limits, each a count over its own sliding window.
//!
//! Both are backed by reservations. A reservation is taken right before
//! dispatch; counting and recording happen atomically in the backend so
//! concurrent deliveries cannot overshoot a limit.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use memory::MemoryRateLimitBackend;
pub use sqlite::SqlRateLimitBackend;

/// Length of the daily window in seconds.
pub const DAILY_WINDOW_SECS: i64 = 86_400;

/// Longest custom window honoured; longer windows are clamped to it.
pub const MAX_WINDOW_SECS: i64 = 10 * 366 * DAILY_WINDOW_SECS;

/// Identifier of a taken reservation.
pub type ReservationId = i64;

/// A connection-level limit: at most `limit` deliveries per window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRateLimit {
    /// Limit identifier.
    pub id: String,
    /// Window length in seconds.
    pub time_window_seconds: u64,
    /// Deliveries allowed within the window.
    pub limit: u32,
}

impl CustomRateLimit {
    /// Create a new limit.
    pub fn new(id: impl Into<String>, limit: u32, time_window_seconds: u64) -> Self {
        Self {
            id: id.into(),
            time_window_seconds,
            limit,
        }
    }

    /// Window length as a duration, clamped to [`MAX_WINDOW_SECS`].
    pub fn window(&self) -> Duration {
        let secs = i64::try_from(self.time_window_seconds)
            .unwrap_or(MAX_WINDOW_SECS)
            .min(MAX_WINDOW_SECS);
        Duration::try_seconds(secs).unwrap_or(Duration::zero())
    }

    /// Start of the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Limits that apply to one (feed, connection) delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Deliveries allowed per feed over the trailing day.
    pub daily: u32,
    /// Custom limits of the connection.
    pub connection: Vec<CustomRateLimit>,
}

impl Limits {
    /// Only a daily cap.
    pub fn daily(daily: u32) -> Self {
        Self {
            daily,
            connection: Vec::new(),
        }
    }

    /// Add connection-level limits.
    pub fn with_connection_limits(mut self, limits: Vec<CustomRateLimit>) -> Self {
        self.connection = limits;
        self
    }
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Delivery may proceed; the reservation counts against the limits.
    Allowed { id: ReservationId },
    /// The feed's daily cap is used up.
    DailyLimitExceeded,
    /// A custom limit of the connection is used up.
    ConnectionLimitExceeded { limit_id: String },
}

impl Reservation {
    /// Check if delivery may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed { .. })
    }
}

/// Storage for reservations.
///
/// Implementations must make `reserve` atomic with respect to concurrent
/// callers.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Take a reservation if every limit has room at `now`.
    async fn reserve(
        &self,
        feed_id: &str,
        connection_id: &str,
        limits: &Limits,
        now: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Give back a reservation whose delivery was never dispatched.
    async fn release(&self, id: ReservationId) -> Result<()>;

    /// Count reservations after `since`, for a feed or one of its connections.
    async fn count_since(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Drop reservations older than `before`.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Drop every reservation of a feed.
    async fn purge(&self, feed_id: &str) -> Result<u64>;
}

/// Deliveries still allowed for a feed today.
pub async fn remaining_daily(
    backend: &dyn RateLimitBackend,
    feed_id: &str,
    daily: u32,
    now: DateTime<Utc>,
) -> Result<u32> {
    let used = backend
        .count_since(feed_id, None, now - Duration::seconds(DAILY_WINDOW_SECS))
        .await?;
    Ok(daily.saturating_sub(used.min(u32::MAX as u64) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_limit_deserialize() {
        let limit: CustomRateLimit =
            serde_json::from_str(r#"{"id": "burst", "timeWindowSeconds": 60, "limit": 2}"#)
                .unwrap();
        assert_eq!(limit, CustomRateLimit::new("burst", 2, 60));
        assert_eq!(limit.window(), Duration::seconds(60));
    }

    #[test]
    fn test_oversized_window_is_clamped() {
        let max = Duration::seconds(MAX_WINDOW_SECS);
        assert_eq!(CustomRateLimit::new("w", 1, u64::MAX).window(), max);
        assert_eq!(CustomRateLimit::new("w", 1, 100_000_000_000_000).window(), max);
        assert_eq!(CustomRateLimit::new("w", 1, 0).window(), Duration::zero());

        let now = Utc::now();
        let limit = CustomRateLimit::new("w", 1, u64::MAX);
        assert!(limit.window_start(now) < now);
        assert_eq!(
            limit.window_start(DateTime::<Utc>::MIN_UTC),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_reservation_is_allowed() {
        assert!(Reservation::Allowed { id: 1 }.is_allowed());
        assert!(!Reservation::DailyLimitExceeded.is_allowed());
        assert!(!Reservation::ConnectionLimitExceeded {
            limit_id: "x".into()
        }
        .is_allowed());
    }

    #[tokio::test]
    async fn test_remaining_daily() {
        let backend = MemoryRateLimitBackend::new();
        let now = Utc::now();
        let limits = Limits::daily(3);

        assert_eq!(remaining_daily(&backend, "feed-1", 3, now).await.unwrap(), 3);
        backend.reserve("feed-1", "c1", &limits, now).await.unwrap();
        backend.reserve("feed-1", "c2", &limits, now).await.unwrap();
        assert_eq!(remaining_daily(&backend, "feed-1", 3, now).await.unwrap(), 1);
    }
}
