//! Per-feed article processing.
//!
//! One run of a `deliver-articles` event goes through, in order:
//!
//! 1. take the feed's lease,
//! 2. select new articles from the fingerprint store (read only),
//! 3. per article and connection: filter, reserve, format, send, record,
//! 4. apply backoff for rejections,
//! 5. commit the selection's fingerprints, reset counters after a clean run
//!    and release the lease.
//!
//! Fingerprints are written last and delivery records are unique per
//! (event, connection, article), so an aborted run can be replayed with the
//! same event without sending twice what was already recorded.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event::{DeliverArticlesEvent, FeedRejectedEvent, InputEvent, OutputEvent};
use super::lease::{LeaseRepository, SqlLeaseRepository};
use crate::article::Article;
use crate::config::DeliveryConfig;
use crate::connection::Connection;
use crate::db::Database;
use crate::delivery::{
    classify, BackoffController, DeliveryClient, DeliveryOutcome, DeliveryRecord,
    DeliveryRecordRepository, ErrorCode, RejectionCode, RejectionScope, RetryRecordRepository,
    SqlDeliveryRecordRepository, SqlRetryRecordRepository,
};
use crate::filter::CompiledFilter;
use crate::fingerprint::{
    ComparisonOptions, FingerprintPolicy, FingerprintRepository, FingerprintStore,
    SqlFingerprintRepository,
};
use crate::format::{resolve_custom_placeholders, Formatter};
use crate::rate_limit::{Limits, RateLimitBackend, Reservation, SqlRateLimitBackend};
use crate::{RelayError, Result};

/// Every store the pipeline talks to.
#[derive(Clone)]
pub struct Stores {
    pub fingerprints: Arc<dyn FingerprintRepository>,
    pub deliveries: Arc<dyn DeliveryRecordRepository>,
    pub retries: Arc<dyn RetryRecordRepository>,
    pub rate_limits: Arc<dyn RateLimitBackend>,
    pub leases: Arc<dyn LeaseRepository>,
}

impl Stores {
    /// All stores backed by one SQLite database.
    pub fn sqlite(db: &Database) -> Self {
        let pool = db.pool();
        Self {
            fingerprints: Arc::new(SqlFingerprintRepository::new(pool.clone())),
            deliveries: Arc::new(SqlDeliveryRecordRepository::new(pool.clone())),
            retries: Arc::new(SqlRetryRecordRepository::new(pool.clone())),
            rate_limits: Arc::new(SqlRateLimitBackend::new(pool.clone())),
            leases: Arc::new(SqlLeaseRepository::new(pool.clone())),
        }
    }
}

/// What a handled event produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Output events in the order they happened.
    pub events: Vec<OutputEvent>,
    /// Articles selected for delivery.
    pub selected: usize,
    /// (article, connection) pairs held back by a rate limit, not recorded.
    pub withheld: usize,
    /// Pairs already recorded by an earlier run of the same event.
    pub skipped: usize,
}

impl RunReport {
    /// Number of delivery-result events.
    pub fn results(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, OutputEvent::DeliveryResult { .. }))
            .count()
    }
}

/// The article processing pipeline.
pub struct Pipeline {
    fingerprints: FingerprintStore,
    deliveries: Arc<dyn DeliveryRecordRepository>,
    rate_limits: Arc<dyn RateLimitBackend>,
    leases: Arc<dyn LeaseRepository>,
    backoff: BackoffController,
    client: Arc<dyn DeliveryClient>,
    formatter: Formatter,
    settings: DeliveryConfig,
}

impl Pipeline {
    /// Create a pipeline over the given stores and delivery client.
    pub fn new(stores: Stores, client: Arc<dyn DeliveryClient>, settings: &DeliveryConfig) -> Self {
        let fingerprints = FingerprintStore::new(stores.fingerprints).with_policy(FingerprintPolicy {
            hash_values: settings.hash_field_values,
        });
        Self {
            fingerprints,
            deliveries: stores.deliveries,
            rate_limits: stores.rate_limits,
            leases: stores.leases,
            backoff: BackoffController::new(stores.retries, settings.disable_threshold),
            client,
            formatter: Formatter::new(settings.max_message_length),
            settings: settings.clone(),
        }
    }

    /// Handle any input event.
    pub async fn handle(&self, event: InputEvent) -> Result<RunReport> {
        match event {
            InputEvent::DeliverArticles(event) => self.run_deliver(&event).await,
            InputEvent::FeedDeleted { feed_id } => self.handle_feed_deleted(&feed_id).await,
            InputEvent::FeedRejected(event) => self.handle_feed_rejected(&event).await,
        }
    }

    /// Process a feed refresh under the feed's lease.
    ///
    /// Fails with [`RelayError::FeedBusy`] if another run holds the lease and
    /// with [`RelayError::StoreTimeout`] if any store call stalls; both leave
    /// the event safe to redeliver.
    pub async fn run_deliver(&self, event: &DeliverArticlesEvent) -> Result<RunReport> {
        let feed_id = event.feed.id.as_str();
        let holder = Uuid::new_v4().to_string();

        let acquired = self
            .bounded(
                "lease acquire",
                self.leases
                    .acquire(feed_id, &holder, Utc::now(), self.settings.lease_ttl()),
            )
            .await?;
        if !acquired {
            return Err(RelayError::FeedBusy(feed_id.to_string()));
        }

        let result = self.deliver(event).await;

        if let Err(e) = self
            .bounded("lease release", self.leases.release(feed_id, &holder))
            .await
        {
            warn!("Failed to release lease of feed {}: {}", feed_id, e);
        }

        if let Err(e) = &result {
            warn!("Run of event {} for feed {} aborted: {}", event.id, feed_id, e);
        }
        result
    }

    async fn deliver(&self, event: &DeliverArticlesEvent) -> Result<RunReport> {
        let feed = &event.feed;
        let now = Utc::now();
        let mut report = RunReport::default();

        let options = ComparisonOptions {
            passing_comparisons: feed.passing_comparisons.clone(),
            blocking_comparisons: feed.blocking_comparisons.clone(),
            max_article_age: feed
                .max_article_age_seconds
                .map(|secs| chrono::Duration::seconds(secs.min(u64::from(u32::MAX)) as i64)),
            date_fields: feed.date_fields.clone(),
            skip_initial_articles: self.settings.skip_initial_articles,
        };

        let selection = self
            .bounded(
                "fingerprint selection",
                self.fingerprints.compare(&feed.id, &event.articles, &options, now),
            )
            .await?;
        report.selected = selection.deliver.len();

        let mut rejected = false;
        if !selection.deliver.is_empty() {
            rejected = self.deliver_selected(event, &selection.deliver, now, &mut report).await?;
        }

        self.bounded(
            "fingerprint commit",
            self.fingerprints.commit(&selection.pending),
        )
        .await?;

        // Only a run that fully completed clears the feed's rejection counters
        if !rejected {
            self.bounded(
                "retry reset",
                self.backoff.record_success(&feed.id, now),
            )
            .await?;
        }

        if report.withheld > 0 {
            info!(
                "Feed {}: {} delivery(ies) withheld by rate limits",
                feed.id, report.withheld
            );
        }
        info!(
            "Feed {}: {} of {} article(s) selected, {} result(s), {} skipped",
            feed.id,
            report.selected,
            event.articles.len(),
            report.results(),
            report.skipped
        );

        Ok(report)
    }

    /// Deliver the selected articles to every connection.
    ///
    /// Returns whether any connection was rejected.
    async fn deliver_selected(
        &self,
        event: &DeliverArticlesEvent,
        articles: &[Article],
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<bool> {
        let feed_id = event.feed.id.as_str();

        let recorded = self
            .bounded(
                "delivery record lookup",
                self.deliveries.recorded_for_event(&event.id),
            )
            .await?;

        let compiled: Vec<(&Connection, CompiledFilter)> = event
            .connections
            .iter()
            .map(|c| (c, CompiledFilter::compile(c.filters.as_ref())))
            .collect();

        for (connection, filter) in &compiled {
            if !filter.errors().is_empty() {
                warn!(
                    "Feed {} connection {} has {} invalid filter rule(s)",
                    feed_id,
                    connection.id,
                    filter.errors().len()
                );
                report.events.push(OutputEvent::FilterErrors {
                    feed_id: feed_id.to_string(),
                    connection_id: connection.id.clone(),
                    errors: filter.errors().to_vec(),
                });
            }
        }

        let daily = event
            .feed
            .article_day_limit
            .unwrap_or(self.settings.default_daily_limit);
        let mut rejected_connections: HashSet<&str> = HashSet::new();

        for article in articles {
            let id_hash = article.id_hash();

            for (connection, filter) in &compiled {
                if rejected_connections.contains(connection.id.as_str()) {
                    continue;
                }
                if recorded.contains(&(connection.id.clone(), id_hash.clone())) {
                    report.skipped += 1;
                    continue;
                }

                let fields = match resolve_custom_placeholders(
                    &article.flattened,
                    &connection.custom_placeholders,
                ) {
                    Ok(fields) => fields,
                    Err(e) => {
                        let outcome =
                            DeliveryOutcome::failed(ErrorCode::ArticleProcessingError, e.to_string());
                        self.record(event, connection, &id_hash, outcome, now, report)
                            .await?;
                        continue;
                    }
                };

                if !filter.evaluate(&fields, false).passed {
                    self.record(event, connection, &id_hash, DeliveryOutcome::FilteredOut, now, report)
                        .await?;
                    continue;
                }

                if !connection.target.is_set() {
                    let outcome = DeliveryOutcome::failed(
                        ErrorCode::NoChannelOrWebhook,
                        "connection has no channel or webhook",
                    );
                    self.record(event, connection, &id_hash, outcome, now, report)
                        .await?;
                    continue;
                }

                let limits =
                    Limits::daily(daily).with_connection_limits(connection.rate_limits.clone());
                let reservation = self
                    .bounded(
                        "rate limit reservation",
                        self.rate_limits.reserve(feed_id, &connection.id, &limits, now),
                    )
                    .await?;
                let reservation_id = match reservation {
                    Reservation::Allowed { id } => id,
                    Reservation::DailyLimitExceeded => {
                        debug!("Feed {}: daily limit of {} reached", feed_id, daily);
                        report.withheld += 1;
                        continue;
                    }
                    Reservation::ConnectionLimitExceeded { limit_id } => {
                        debug!(
                            "Feed {} connection {}: rate limit {} reached",
                            feed_id, connection.id, limit_id
                        );
                        report.withheld += 1;
                        continue;
                    }
                };

                let payloads = match self.formatter.format_resolved(fields, connection) {
                    Ok(payloads) => payloads,
                    Err(e) => {
                        self.bounded(
                            "rate limit release",
                            self.rate_limits.release(reservation_id),
                        )
                        .await?;
                        let outcome =
                            DeliveryOutcome::failed(ErrorCode::ArticleProcessingError, e.to_string());
                        self.record(event, connection, &id_hash, outcome, now, report)
                            .await?;
                        continue;
                    }
                };

                let mut outcome = DeliveryOutcome::Sent;
                let mut rejection = None;
                for payload in &payloads {
                    let response = self.client.send(connection, payload).await;
                    let (result, code) = classify(&response);
                    if result != DeliveryOutcome::Sent {
                        outcome = result;
                        rejection = code;
                        break;
                    }
                }

                self.record(event, connection, &id_hash, outcome, now, report)
                    .await?;

                if let Some(code) = rejection {
                    rejected_connections.insert(connection.id.as_str());
                    self.reject(feed_id, RejectionScope::Connection(connection.id.clone()), code, now, report)
                        .await?;
                }
            }
        }

        Ok(!rejected_connections.is_empty())
    }

    async fn record(
        &self,
        event: &DeliverArticlesEvent,
        connection: &Connection,
        id_hash: &str,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        let record = DeliveryRecord::new(
            event.id.as_str(),
            event.feed.id.as_str(),
            connection.id.as_str(),
            id_hash,
            &outcome,
            now,
        );
        let inserted = self
            .bounded("delivery record insert", self.deliveries.insert(&record))
            .await?;
        if !inserted {
            debug!(
                "Delivery of {} to {} already recorded for event {}",
                id_hash, connection.id, event.id
            );
            return Ok(());
        }

        if let DeliveryOutcome::Failed {
            error_code,
            internal_message,
        } = &outcome
        {
            debug!(
                "Feed {} connection {}: delivery failed ({}): {}",
                event.feed.id, connection.id, error_code, internal_message
            );
        }

        report.events.push(OutputEvent::DeliveryResult {
            feed_id: record.feed_id,
            connection_id: record.connection_id,
            article_id_hash: record.article_id_hash,
            outcome: record.status,
            error_code: record.error_code,
        });
        Ok(())
    }

    async fn reject(
        &self,
        feed_id: &str,
        scope: RejectionScope,
        code: RejectionCode,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        let request = self
            .bounded(
                "retry increment",
                self.backoff.register_rejection(feed_id, &scope, code, now),
            )
            .await?;
        if let Some(request) = request {
            report.events.push(request.into());
        }
        Ok(())
    }

    /// Drop every piece of state kept for a feed.
    pub async fn handle_feed_deleted(&self, feed_id: &str) -> Result<RunReport> {
        let fingerprints = self
            .bounded("fingerprint purge", self.fingerprints.purge(feed_id))
            .await?;
        let retries = self
            .bounded("retry purge", self.backoff.purge(feed_id))
            .await?;
        let records = self
            .bounded("delivery record purge", self.deliveries.delete_by_feed(feed_id))
            .await?;
        let reservations = self
            .bounded("rate limit purge", self.rate_limits.purge(feed_id))
            .await?;
        self.bounded("lease purge", self.leases.delete(feed_id))
            .await?;

        info!(
            "Feed {} deleted: purged {} fingerprint(s), {} retry record(s), {} delivery record(s), {} reservation(s)",
            feed_id, fingerprints, retries, records, reservations
        );
        Ok(RunReport::default())
    }

    /// Count an external rejection of a feed or one of its connections.
    pub async fn handle_feed_rejected(&self, event: &FeedRejectedEvent) -> Result<RunReport> {
        let code = RejectionCode::parse(&event.rejection_code)?;
        let scope = match &event.connection_id {
            Some(connection_id) => RejectionScope::Connection(connection_id.clone()),
            None => RejectionScope::Feed,
        };

        let mut report = RunReport::default();
        self.reject(&event.feed_id, scope, code, Utc::now(), &mut report)
            .await?;
        Ok(report)
    }

    /// Drop reservations that no window can count any more.
    pub async fn prune_reservations(&self, now: DateTime<Utc>, max_window: Duration) -> Result<u64> {
        let keep = chrono::Duration::from_std(max_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(crate::rate_limit::DAILY_WINDOW_SECS));
        self.bounded("rate limit prune", self.rate_limits.prune(now - keep))
            .await
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Store call {} exceeded {:?}",
                    operation,
                    self.settings.store_timeout()
                );
                Err(RelayError::StoreTimeout(operation.to_string()))
            }
        }
    }
}
