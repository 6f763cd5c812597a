//! Rejection handling and disable decisions.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::retry::RetryRecordRepository;
use crate::{RelayError, Result};

/// Downstream rejection codes that drive backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionCode {
    BadRequest,
    Forbidden,
    MediumNotFound,
    InvalidFeed,
}

impl RejectionCode {
    /// Parse a wire code.
    ///
    /// Unknown codes are an error, never mapped to a default.
    pub fn parse(code: &str) -> Result<Self> {
        match code {
            "bad-request" => Ok(RejectionCode::BadRequest),
            "forbidden" => Ok(RejectionCode::Forbidden),
            "medium-not-found" => Ok(RejectionCode::MediumNotFound),
            "invalid-feed" => Ok(RejectionCode::InvalidFeed),
            _ => Err(RelayError::UnhandledRejectionCode(code.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::BadRequest => "bad-request",
            RejectionCode::Forbidden => "forbidden",
            RejectionCode::MediumNotFound => "medium-not-found",
            RejectionCode::InvalidFeed => "invalid-feed",
        }
    }

    /// Disable reason for the rejection.
    pub fn disable_reason(&self) -> DisableReason {
        match self {
            RejectionCode::BadRequest => DisableReason::BadFormat,
            RejectionCode::Forbidden => DisableReason::MissingPermissions,
            RejectionCode::MediumNotFound => DisableReason::MissingMedium,
            RejectionCode::InvalidFeed => DisableReason::InvalidFeed,
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a feed or connection gets disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisableReason {
    BadFormat,
    MissingPermissions,
    MissingMedium,
    InvalidFeed,
}

impl DisableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisableReason::BadFormat => "bad-format",
            DisableReason::MissingPermissions => "missing-permissions",
            DisableReason::MissingMedium => "missing-medium",
            DisableReason::InvalidFeed => "invalid-feed",
        }
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a rejection applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionScope {
    Feed,
    Connection(String),
}

impl RejectionScope {
    fn connection_id(&self) -> Option<&str> {
        match self {
            RejectionScope::Feed => None,
            RejectionScope::Connection(id) => Some(id),
        }
    }
}

/// A decision to disable a feed or one of its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableRequest {
    Feed {
        feed_id: String,
        reason: DisableReason,
    },
    Connection {
        feed_id: String,
        connection_id: String,
        reason: DisableReason,
    },
}

/// Counts consecutive rejections and decides when to disable.
pub struct BackoffController {
    retries: Arc<dyn RetryRecordRepository>,
    threshold: i64,
}

impl BackoffController {
    /// Create a controller disabling after `threshold` consecutive rejections.
    pub fn new(retries: Arc<dyn RetryRecordRepository>, threshold: u32) -> Self {
        Self {
            retries,
            threshold: i64::from(threshold.max(1)),
        }
    }

    /// Count a rejection.
    ///
    /// Returns a disable request exactly once, when the count reaches the
    /// threshold. Further rejections keep counting without repeating it.
    pub async fn register_rejection(
        &self,
        feed_id: &str,
        scope: &RejectionScope,
        code: RejectionCode,
        now: DateTime<Utc>,
    ) -> Result<Option<DisableRequest>> {
        let attempts = self
            .retries
            .increment(feed_id, scope.connection_id(), now)
            .await?;
        debug!(
            "Feed {} rejection {} ({:?}): attempt {}/{}",
            feed_id, code, scope, attempts, self.threshold
        );

        if attempts != self.threshold {
            return Ok(None);
        }

        let reason = code.disable_reason();
        let request = match scope {
            RejectionScope::Feed => {
                warn!(
                    "Feed {} disabled after {} consecutive rejections: {}",
                    feed_id, attempts, reason
                );
                DisableRequest::Feed {
                    feed_id: feed_id.to_string(),
                    reason,
                }
            }
            RejectionScope::Connection(connection_id) => {
                warn!(
                    "Connection {} of feed {} disabled after {} consecutive rejections: {}",
                    connection_id, feed_id, attempts, reason
                );
                DisableRequest::Connection {
                    feed_id: feed_id.to_string(),
                    connection_id: connection_id.clone(),
                    reason,
                }
            }
        };
        Ok(Some(request))
    }

    /// Count a rejection given by its wire code.
    pub async fn register_code(
        &self,
        feed_id: &str,
        scope: &RejectionScope,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DisableRequest>> {
        let code = RejectionCode::parse(code)?;
        self.register_rejection(feed_id, scope, code, now).await
    }

    /// A run without rejections: every counter of the feed goes back to zero.
    pub async fn record_success(&self, feed_id: &str, now: DateTime<Utc>) -> Result<()> {
        let reset = self.retries.reset_feed(feed_id, now).await?;
        if reset > 0 {
            debug!("Feed {}: reset {} retry counter(s)", feed_id, reset);
        }
        Ok(())
    }

    /// Current count for a scope.
    pub async fn attempts(&self, feed_id: &str, scope: &RejectionScope) -> Result<i64> {
        Ok(self
            .retries
            .get(feed_id, scope.connection_id())
            .await?
            .map_or(0, |r| r.attempts_so_far))
    }

    /// Drop every counter of a feed.
    pub async fn purge(&self, feed_id: &str) -> Result<u64> {
        self.retries.delete_by_feed(feed_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::delivery::SqlRetryRecordRepository;

    async fn setup_controller(threshold: u32) -> BackoffController {
        let db = Database::open_in_memory().await.unwrap();
        let repo = Arc::new(SqlRetryRecordRepository::new(db.pool().clone()));
        BackoffController::new(repo, threshold)
    }

    #[test]
    fn test_mapping_is_exhaustive() {
        let cases = [
            ("bad-request", DisableReason::BadFormat),
            ("forbidden", DisableReason::MissingPermissions),
            ("medium-not-found", DisableReason::MissingMedium),
            ("invalid-feed", DisableReason::InvalidFeed),
        ];
        for (code, reason) in cases {
            let parsed = RejectionCode::parse(code).unwrap();
            assert_eq!(parsed.as_str(), code);
            assert_eq!(parsed.disable_reason(), reason);
        }
    }

    #[test]
    fn test_unknown_code_is_error() {
        let err = RejectionCode::parse("rate-limited").unwrap_err();
        assert!(matches!(err, RelayError::UnhandledRejectionCode(ref c) if c == "rate-limited"));
    }

    #[tokio::test]
    async fn test_disable_emitted_once_at_threshold() {
        let controller = setup_controller(3).await;
        let now = Utc::now();
        let scope = RejectionScope::Feed;

        let mut requests = Vec::new();
        for _ in 0..5 {
            if let Some(request) = controller
                .register_rejection("f", &scope, RejectionCode::BadRequest, now)
                .await
                .unwrap()
            {
                requests.push(request);
            }
        }

        assert_eq!(
            requests,
            vec![DisableRequest::Feed {
                feed_id: "f".to_string(),
                reason: DisableReason::BadFormat,
            }]
        );
        assert_eq!(controller.attempts("f", &scope).await.unwrap(), 5);

        controller.record_success("f", now).await.unwrap();
        assert_eq!(controller.attempts("f", &scope).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_scope() {
        let controller = setup_controller(2).await;
        let now = Utc::now();
        let scope = RejectionScope::Connection("c1".to_string());

        assert!(controller
            .register_code("f", &scope, "forbidden", now)
            .await
            .unwrap()
            .is_none());
        let request = controller
            .register_code("f", &scope, "forbidden", now)
            .await
            .unwrap();
        assert_eq!(
            request,
            Some(DisableRequest::Connection {
                feed_id: "f".to_string(),
                connection_id: "c1".to_string(),
                reason: DisableReason::MissingPermissions,
            })
        );
        // Feed counter untouched
        assert_eq!(controller.attempts("f", &RejectionScope::Feed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_unknown_code_does_not_count() {
        let controller = setup_controller(1).await;
        let result = controller
            .register_code("f", &RejectionScope::Feed, "teapot", Utc::now())
            .await;
        assert!(matches!(result, Err(RelayError::UnhandledRejectionCode(_))));
        assert_eq!(controller.attempts("f", &RejectionScope::Feed).await.unwrap(), 0);
    }
}
