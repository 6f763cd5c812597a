//! Delivery connections.
//!
//! A connection is one configured delivery target of a feed, with its own
//! filter, message template, format options and rate limits.

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::filter::FilterExpression;
use crate::format::{CustomPlaceholder, FormatOptions, MessageTemplate};
use crate::rate_limit::CustomRateLimit;

/// Where a connection delivers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

impl DeliveryTarget {
    /// A channel target.
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            channel_id: Some(id.into()),
            webhook: None,
        }
    }

    /// Check if there is anywhere to deliver to.
    pub fn is_set(&self) -> bool {
        self.channel_id.as_deref().is_some_and(|c| !c.is_empty()) || self.webhook.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A delivery connection of a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(deserialize_with = "non_empty_id")]
    pub id: String,
    #[serde(default)]
    pub target: DeliveryTarget,
    #[serde(default)]
    pub filters: Option<FilterExpression>,
    #[serde(default)]
    pub template: MessageTemplate,
    #[serde(default)]
    pub format_options: FormatOptions,
    #[serde(default)]
    pub custom_placeholders: Vec<CustomPlaceholder>,
    #[serde(default)]
    pub rate_limits: Vec<CustomRateLimit>,
}

impl Connection {
    /// Create a connection delivering to a channel with a content template.
    pub fn new(id: impl Into<String>, channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: DeliveryTarget::channel(channel_id),
            template: MessageTemplate::content(content),
            ..Default::default()
        }
    }

    /// Set the filter expression.
    pub fn with_filters(mut self, filters: FilterExpression) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Set the format options.
    pub fn with_format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = options;
        self
    }

    /// Add a custom placeholder.
    pub fn with_custom_placeholder(mut self, placeholder: CustomPlaceholder) -> Self {
        self.custom_placeholders.push(placeholder);
        self
    }

    /// Add a custom rate limit.
    pub fn with_rate_limit(mut self, limit: CustomRateLimit) -> Self {
        self.rate_limits.push(limit);
        self
    }
}

/// Deserialize a connection id, refusing the empty string.
pub(crate) fn non_empty_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let id = String::deserialize(deserializer)?;
    if id.trim().is_empty() {
        return Err(de::Error::custom("connection id must not be empty"));
    }
    Ok(id)
}

/// Like [`non_empty_id`], for an optional id.
pub(crate) fn non_empty_optional_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(id) if id.trim().is_empty() => {
            Err(de::Error::custom("connection id must not be empty"))
        }
        id => Ok(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let connection: Connection = serde_json::from_str(r#"{"id": "c1"}"#).unwrap();
        assert_eq!(connection.id, "c1");
        assert!(!connection.target.is_set());
        assert!(connection.filters.is_none());
    }

    #[test]
    fn test_empty_id_is_rejected() {
        assert!(serde_json::from_str::<Connection>(r#"{"id": ""}"#).is_err());
        assert!(serde_json::from_str::<Connection>(r#"{"id": "  "}"#).is_err());
    }

    #[test]
    fn test_deserialize_full() {
        let json = r#"{
            "id": "c1",
            "target": {"channelId": "123"},
            "filters": {
                "type": "RELATIONAL",
                "op": "CONTAINS",
                "left": "title",
                "right": {"type": "STRING", "value": "rust"}
            },
            "template": {"content": "{{title}}"},
            "formatOptions": {"stripImages": true, "split": {"splitChar": "\n"}},
            "rateLimits": [{"id": "r1", "timeWindowSeconds": 60, "limit": 2}]
        }"#;
        let connection: Connection = serde_json::from_str(json).unwrap();

        assert!(connection.target.is_set());
        assert!(connection.filters.is_some());
        assert!(connection.format_options.strip_images);
        assert_eq!(connection.rate_limits.len(), 1);
    }

    #[test]
    fn test_webhook_target() {
        let target = DeliveryTarget {
            channel_id: Some(String::new()),
            webhook: Some(Webhook {
                id: "w1".to_string(),
                name: None,
            }),
        };
        assert!(target.is_set());
        assert!(!DeliveryTarget::channel("").is_set());
    }
}
