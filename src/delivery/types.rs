//! Delivery outcome types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed taxonomy of delivery failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Internal,
    NoChannelOrWebhook,
    ThirdPartyInternal,
    ThirdPartyBadRequest,
    ThirdPartyForbidden,
    ThirdPartyNotFound,
    ArticleProcessingError,
}

impl ErrorCode {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "internal",
            ErrorCode::NoChannelOrWebhook => "no-channel-or-webhook",
            ErrorCode::ThirdPartyInternal => "third-party-internal",
            ErrorCode::ThirdPartyBadRequest => "third-party-bad-request",
            ErrorCode::ThirdPartyForbidden => "third-party-forbidden",
            ErrorCode::ThirdPartyNotFound => "third-party-not-found",
            ErrorCode::ArticleProcessingError => "article-processing-error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(ErrorCode::Internal),
            "no-channel-or-webhook" => Ok(ErrorCode::NoChannelOrWebhook),
            "third-party-internal" => Ok(ErrorCode::ThirdPartyInternal),
            "third-party-bad-request" => Ok(ErrorCode::ThirdPartyBadRequest),
            "third-party-forbidden" => Ok(ErrorCode::ThirdPartyForbidden),
            "third-party-not-found" => Ok(ErrorCode::ThirdPartyNotFound),
            "article-processing-error" => Ok(ErrorCode::ArticleProcessingError),
            _ => Err(format!("unknown error code: {s}")),
        }
    }
}

/// Terminal state of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    FilteredOut,
}

impl DeliveryStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::FilteredOut => "filtered-out",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "filtered-out" => Ok(DeliveryStatus::FilteredOut),
            _ => Err(format!("unknown delivery status: {s}")),
        }
    }
}

/// Outcome of delivering an article through a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The outbound call succeeded.
    Sent,
    /// The outbound call failed, or never happened.
    ///
    /// The internal message is for operators and never shown to end users.
    Failed {
        error_code: ErrorCode,
        internal_message: String,
    },
    /// The connection's filter rejected the article.
    FilteredOut,
}

impl DeliveryOutcome {
    /// Shorthand for a failure.
    pub fn failed(error_code: ErrorCode, internal_message: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            error_code,
            internal_message: internal_message.into(),
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryOutcome::Sent => DeliveryStatus::Sent,
            DeliveryOutcome::Failed { .. } => DeliveryStatus::Failed,
            DeliveryOutcome::FilteredOut => DeliveryStatus::FilteredOut,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            DeliveryOutcome::Failed { error_code, .. } => Some(*error_code),
            _ => None,
        }
    }
}

/// A persisted delivery attempt. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub id: String,
    /// Input event that produced the attempt.
    pub event_id: String,
    pub feed_id: String,
    pub connection_id: String,
    pub article_id_hash: String,
    pub status: DeliveryStatus,
    pub error_code: Option<ErrorCode>,
    pub internal_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Build a record for an outcome with a fresh id.
    pub fn new(
        event_id: impl Into<String>,
        feed_id: impl Into<String>,
        connection_id: impl Into<String>,
        article_id_hash: impl Into<String>,
        outcome: &DeliveryOutcome,
        created_at: DateTime<Utc>,
    ) -> Self {
        let internal_message = match outcome {
            DeliveryOutcome::Failed {
                internal_message, ..
            } => Some(internal_message.clone()),
            _ => None,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            feed_id: feed_id.into(),
            connection_id: connection_id.into(),
            article_id_hash: article_id_hash.into(),
            status: outcome.status(),
            error_code: outcome.error_code(),
            internal_message,
            created_at,
        }
    }
}
