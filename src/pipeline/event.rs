//! Input and output events.

use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::connection::Connection;
use crate::delivery::{DeliveryStatus, DisableReason, DisableRequest, ErrorCode};
use crate::filter::FilterError;

/// An event consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InputEvent {
    /// Articles of a refreshed feed to deliver.
    DeliverArticles(DeliverArticlesEvent),
    /// A feed was removed; all of its state is dropped.
    #[serde(rename_all = "camelCase")]
    FeedDeleted { feed_id: String },
    /// The fetch layer or a provider rejected a feed or connection.
    FeedRejected(FeedRejectedEvent),
}

impl InputEvent {
    /// Key that orders events: events with the same key run one at a time.
    pub fn feed_key(&self) -> &str {
        match self {
            InputEvent::DeliverArticles(event) => &event.feed.id,
            InputEvent::FeedDeleted { feed_id } => feed_id,
            InputEvent::FeedRejected(event) => &event.feed_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverArticlesEvent {
    /// Event id, stable across redeliveries of the same event.
    pub id: String,
    pub feed: FeedDetails,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDetails {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub passing_comparisons: Vec<String>,
    #[serde(default)]
    pub blocking_comparisons: Vec<String>,
    /// Per-feed daily article cap; the configured default applies when unset.
    #[serde(default)]
    pub article_day_limit: Option<u32>,
    #[serde(default)]
    pub max_article_age_seconds: Option<u64>,
    #[serde(default)]
    pub date_fields: Vec<String>,
}

impl FeedDetails {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRejectedEvent {
    pub feed_id: String,
    /// Set when only one connection was rejected.
    #[serde(default, deserialize_with = "crate::connection::non_empty_optional_id")]
    pub connection_id: Option<String>,
    pub rejection_code: String,
}

/// An event produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OutputEvent {
    #[serde(rename_all = "camelCase")]
    DeliveryResult {
        feed_id: String,
        connection_id: String,
        article_id_hash: String,
        outcome: DeliveryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionDisable {
        feed_id: String,
        connection_id: String,
        disable_reason: DisableReason,
    },
    #[serde(rename_all = "camelCase")]
    FeedDisable {
        feed_id: String,
        disable_reason: DisableReason,
    },
    #[serde(rename_all = "camelCase")]
    FilterErrors {
        feed_id: String,
        connection_id: String,
        errors: Vec<FilterError>,
    },
}

impl From<DisableRequest> for OutputEvent {
    fn from(request: DisableRequest) -> Self {
        match request {
            DisableRequest::Feed { feed_id, reason } => OutputEvent::FeedDisable {
                feed_id,
                disable_reason: reason,
            },
            DisableRequest::Connection {
                feed_id,
                connection_id,
                reason,
            } => OutputEvent::ConnectionDisable {
                feed_id,
                connection_id,
                disable_reason: reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_deliver_articles() {
        let raw = json!({
            "kind": "deliver-articles",
            "id": "ev-1",
            "feed": {
                "id": "feed-1",
                "url": "https://example.com/rss",
                "blockingComparisons": ["title"],
                "articleDayLimit": 5
            },
            "articles": [{"flattened": {"title": "Hello", "link": "https://example.com/1"}}],
            "connections": [{
                "id": "conn-1",
                "target": {"channelId": "chan-1"},
                "template": {"content": "{{title}}"}
            }]
        });

        let event: InputEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.feed_key(), "feed-1");
        let InputEvent::DeliverArticles(event) = event else {
            panic!("Expected deliver-articles");
        };
        assert_eq!(event.id, "ev-1");
        assert_eq!(event.feed.blocking_comparisons, vec!["title".to_string()]);
        assert!(event.feed.passing_comparisons.is_empty());
        assert_eq!(event.feed.article_day_limit, Some(5));
        assert_eq!(event.articles.len(), 1);
        assert_eq!(event.connections[0].target.channel_id.as_deref(), Some("chan-1"));
    }

    #[test]
    fn test_parse_feed_events() {
        let event: InputEvent =
            serde_json::from_str(r#"{"kind":"feed-deleted","feedId":"feed-9"}"#).unwrap();
        assert_eq!(
            event,
            InputEvent::FeedDeleted {
                feed_id: "feed-9".to_string()
            }
        );

        let event: InputEvent = serde_json::from_str(
            r#"{"kind":"feed-rejected","feedId":"feed-9","rejectionCode":"invalid-feed"}"#,
        )
        .unwrap();
        let InputEvent::FeedRejected(event) = event else {
            panic!("Expected feed-rejected");
        };
        assert_eq!(event.connection_id, None);
        assert_eq!(event.rejection_code, "invalid-feed");
    }

    #[test]
    fn test_empty_connection_id_is_rejected() {
        let result = serde_json::from_str::<InputEvent>(
            r#"{"kind":"feed-rejected","feedId":"f","connectionId":"","rejectionCode":"forbidden"}"#,
        );
        assert!(result.is_err());

        let result = serde_json::from_str::<InputEvent>(
            r#"{"kind":"deliver-articles","id":"ev","feed":{"id":"f"},"connections":[{"id":""}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_str::<InputEvent>(r#"{"kind":"feed-paused","feedId":"f"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_serialization() {
        let event = OutputEvent::DeliveryResult {
            feed_id: "f".to_string(),
            connection_id: "c".to_string(),
            article_id_hash: "abc".to_string(),
            outcome: DeliveryStatus::Failed,
            error_code: Some(ErrorCode::ThirdPartyForbidden),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "delivery-result",
                "feedId": "f",
                "connectionId": "c",
                "articleIdHash": "abc",
                "outcome": "failed",
                "errorCode": "third-party-forbidden"
            })
        );

        let event = OutputEvent::from(DisableRequest::Feed {
            feed_id: "f".to_string(),
            reason: DisableReason::InvalidFeed,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"kind": "feed-disable", "feedId": "f", "disableReason": "invalid-feed"})
        );
    }
}
