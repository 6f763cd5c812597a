//! In-memory reservation backend for single-process operation.
//!
//! State is not persisted across restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{Limits, RateLimitBackend, Reservation, ReservationId, DAILY_WINDOW_SECS};
use crate::Result;

/// One taken reservation.
#[derive(Debug, Clone)]
struct Entry {
    id: ReservationId,
    connection_id: String,
    reserved_at: DateTime<Utc>,
}

/// Reservations of a single feed.
#[derive(Debug, Default)]
struct FeedReservations {
    entries: Vec<Entry>,
}

impl FeedReservations {
    /// Count reservations strictly after the cutoff.
    fn count_after(&self, cutoff: DateTime<Utc>, connection_id: Option<&str>) -> usize {
        self.entries
            .iter()
            .filter(|e| e.reserved_at > cutoff)
            .filter(|e| connection_id.map_or(true, |c| e.connection_id == c))
            .count()
    }
}

/// Lock-based reservation backend.
#[derive(Debug)]
pub struct MemoryRateLimitBackend {
    feeds: RwLock<HashMap<String, FeedReservations>>,
    next_id: AtomicI64,
}

impl MemoryRateLimitBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryRateLimitBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryRateLimitBackend {
    async fn reserve(
        &self,
        feed_id: &str,
        connection_id: &str,
        limits: &Limits,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut feeds = self.feeds.write().await;
        let reservations = feeds.entry(feed_id.to_string()).or_default();

        let day_cutoff = now - Duration::seconds(DAILY_WINDOW_SECS);
        if reservations.count_after(day_cutoff, None) >= limits.daily as usize {
            return Ok(Reservation::DailyLimitExceeded);
        }

        for limit in &limits.connection {
            let count = reservations.count_after(limit.window_start(now), Some(connection_id));
            if count >= limit.limit as usize {
                return Ok(Reservation::ConnectionLimitExceeded {
                    limit_id: limit.id.clone(),
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        reservations.entries.push(Entry {
            id,
            connection_id: connection_id.to_string(),
            reserved_at: now,
        });
        Ok(Reservation::Allowed { id })
    }

    async fn release(&self, id: ReservationId) -> Result<()> {
        let mut feeds = self.feeds.write().await;
        for reservations in feeds.values_mut() {
            reservations.entries.retain(|e| e.id != id);
        }
        Ok(())
    }

    async fn count_since(
        &self,
        feed_id: &str,
        connection_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let feeds = self.feeds.read().await;
        Ok(feeds
            .get(feed_id)
            .map_or(0, |r| r.count_after(since, connection_id) as u64))
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut feeds = self.feeds.write().await;
        let mut removed = 0;

        for reservations in feeds.values_mut() {
            let len = reservations.entries.len();
            reservations.entries.retain(|e| e.reserved_at >= before);
            removed += (len - reservations.entries.len()) as u64;
        }

        // Remove feeds with no recent reservations
        feeds.retain(|_, r| !r.entries.is_empty());
        Ok(removed)
    }

    async fn purge(&self, feed_id: &str) -> Result<u64> {
        let mut feeds = self.feeds.write().await;
        Ok(feeds
            .remove(feed_id)
            .map_or(0, |r| r.entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::CustomRateLimit;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_daily_limit() {
        let backend = MemoryRateLimitBackend::new();
        let limits = Limits::daily(2);

        assert!(backend.reserve("f", "c", &limits, t0()).await.unwrap().is_allowed());
        assert!(backend.reserve("f", "c", &limits, t0()).await.unwrap().is_allowed());
        assert_eq!(
            backend.reserve("f", "c", &limits, t0()).await.unwrap(),
            Reservation::DailyLimitExceeded
        );

        // Other feeds are unaffected
        assert!(backend.reserve("g", "c", &limits, t0()).await.unwrap().is_allowed());

        // The window slides
        let later = t0() + Duration::seconds(DAILY_WINDOW_SECS);
        assert!(backend.reserve("f", "c", &limits, later).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_connection_window() {
        let backend = MemoryRateLimitBackend::new();
        let limits =
            Limits::daily(100).with_connection_limits(vec![CustomRateLimit::new("burst", 2, 60)]);

        let at = |secs| t0() + Duration::seconds(secs);
        assert!(backend.reserve("f", "c1", &limits, at(0)).await.unwrap().is_allowed());
        assert!(backend.reserve("f", "c1", &limits, at(1)).await.unwrap().is_allowed());
        assert_eq!(
            backend.reserve("f", "c1", &limits, at(2)).await.unwrap(),
            Reservation::ConnectionLimitExceeded {
                limit_id: "burst".to_string()
            }
        );
        // Another connection of the same feed still has room
        assert!(backend.reserve("f", "c2", &limits, at(2)).await.unwrap().is_allowed());
        // Both earlier reservations have left the window
        assert!(backend.reserve("f", "c1", &limits, at(61)).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_oversized_window_still_limits() {
        let backend = MemoryRateLimitBackend::new();
        for secs in [u64::MAX, 100_000_000_000_000] {
            let limits =
                Limits::daily(100).with_connection_limits(vec![CustomRateLimit::new("w", 1, secs)]);
            let feed = format!("f-{secs}");

            assert!(backend.reserve(&feed, "c", &limits, t0()).await.unwrap().is_allowed());
            assert_eq!(
                backend.reserve(&feed, "c", &limits, t0()).await.unwrap(),
                Reservation::ConnectionLimitExceeded {
                    limit_id: "w".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_release_returns_capacity() {
        let backend = MemoryRateLimitBackend::new();
        let limits = Limits::daily(1);

        let Reservation::Allowed { id } = backend.reserve("f", "c", &limits, t0()).await.unwrap()
        else {
            panic!("Expected Allowed");
        };
        assert!(!backend.reserve("f", "c", &limits, t0()).await.unwrap().is_allowed());

        backend.release(id).await.unwrap();
        assert!(backend.reserve("f", "c", &limits, t0()).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_prune_and_purge() {
        let backend = MemoryRateLimitBackend::new();
        let limits = Limits::daily(10);

        backend.reserve("f", "c", &limits, t0()).await.unwrap();
        backend
            .reserve("f", "c", &limits, t0() + Duration::hours(2))
            .await
            .unwrap();
        backend.reserve("g", "c", &limits, t0()).await.unwrap();

        assert_eq!(backend.prune(t0() + Duration::hours(1)).await.unwrap(), 2);
        assert_eq!(backend.count_since("f", None, t0()).await.unwrap(), 1);
        assert_eq!(backend.purge("f").await.unwrap(), 1);
        assert_eq!(backend.count_since("f", None, t0()).await.unwrap(), 0);
    }
}
