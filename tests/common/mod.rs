//! Test helpers for pipeline integration tests.
//!
//! Provides a recording delivery client and builders for events.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use feedrelay::config::DeliveryConfig;
use feedrelay::pipeline::{DeliverArticlesEvent, FeedDetails};
use feedrelay::{
    Article, Connection, Database, DeliveryClient, DeliveryResponse, MessagePayload, Pipeline,
    Stores,
};

/// Delivery client that records every payload and answers with a fixed status.
pub struct RecordingClient {
    status: Mutex<u16>,
    delay: Option<Duration>,
    sent: Mutex<Vec<(String, MessagePayload)>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(200),
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Answer every send with `status`.
    pub fn with_status(self, status: u16) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Content of every sent payload, in send order.
    pub fn contents(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.content.clone().unwrap_or_default())
            .collect()
    }

    /// Contents sent through one connection.
    pub fn contents_for(&self, connection_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, payload)| payload.content.clone().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl DeliveryClient for RecordingClient {
    async fn send(&self, connection: &Connection, payload: &MessagePayload) -> DeliveryResponse {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((connection.id.clone(), payload.clone()));
        let status = *self.status.lock().unwrap();
        DeliveryResponse::status(status, "")
    }
}

/// Delivery settings for tests: deliver on the first run, small threshold.
pub fn settings() -> DeliveryConfig {
    DeliveryConfig {
        skip_initial_articles: false,
        disable_threshold: 3,
        store_timeout_secs: 5,
        ..DeliveryConfig::default()
    }
}

/// Open an in-memory database.
pub async fn setup_db() -> Database {
    Database::open_in_memory().await.unwrap()
}

/// Build a pipeline over SQLite stores, returning the stores for assertions.
pub fn pipeline_with(
    db: &Database,
    client: Arc<RecordingClient>,
    settings: &DeliveryConfig,
) -> (Pipeline, Stores) {
    let stores = Stores::sqlite(db);
    let pipeline = Pipeline::new(stores.clone(), client, settings);
    (pipeline, stores)
}

/// An article with a title and a link derived from `title`.
pub fn article(title: &str) -> Article {
    let slug = title.to_lowercase().replace(' ', "-");
    Article::new([
        ("title", title.to_string()),
        ("link", format!("https://example.com/{slug}")),
    ])
}

/// A connection posting the article title to a channel.
pub fn connection(id: &str) -> Connection {
    Connection::new(id, format!("chan-{id}"), "{{title}}")
}

pub fn deliver_event(
    event_id: &str,
    feed_id: &str,
    articles: Vec<Article>,
    connections: Vec<Connection>,
) -> DeliverArticlesEvent {
    DeliverArticlesEvent {
        id: event_id.to_string(),
        feed: FeedDetails::new(feed_id, format!("https://example.com/{feed_id}.xml")),
        articles,
        connections,
    }
}
