//! Per-feed "seen" tracking and new-article selection.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::repository::FingerprintRepository;
use super::types::{FieldFingerprint, FingerprintPolicy};
use crate::article::{Article, DEFAULT_DATE_FIELDS, ID_HASH_FIELD};
use crate::Result;

/// Options controlling which articles of a feed are selected for delivery.
#[derive(Debug, Clone, Default)]
pub struct ComparisonOptions {
    /// Fields that let an already-seen article through when their value changed.
    pub passing_comparisons: Vec<String>,
    /// Fields that hold back a new article when their value was seen before.
    pub blocking_comparisons: Vec<String>,
    /// Drop articles older than this.
    pub max_article_age: Option<Duration>,
    /// Raw fields consulted for the article date, in order.
    pub date_fields: Vec<String>,
    /// Seed the store without delivering on a feed's first run.
    pub skip_initial_articles: bool,
}

impl ComparisonOptions {
    fn all_comparisons(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self
            .blocking_comparisons
            .iter()
            .chain(self.passing_comparisons.iter())
        {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Articles chosen for delivery plus the fingerprints to store once the run
/// has finished.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Articles to deliver, oldest first.
    pub deliver: Vec<Article>,
    /// New articles that were held back by a blocking comparison.
    pub blocked: usize,
    /// Seen articles let through by a passing comparison.
    pub passed: usize,
    /// Whether this was the feed's first run.
    pub first_run: bool,
    /// Fingerprints to persist after delivery.
    pub pending: Vec<FieldFingerprint>,
}

/// Fingerprint store for one deployment.
#[derive(Clone)]
pub struct FingerprintStore {
    repo: Arc<dyn FingerprintRepository>,
    policy: FingerprintPolicy,
}

impl FingerprintStore {
    /// Create a new store over a repository.
    pub fn new(repo: Arc<dyn FingerprintRepository>) -> Self {
        Self {
            repo,
            policy: FingerprintPolicy::default(),
        }
    }

    /// Set the value hashing policy.
    pub fn with_policy(mut self, policy: FingerprintPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the article's identity has not been recorded for the feed.
    pub async fn is_new(&self, feed_id: &str, article: &Article) -> Result<bool> {
        let id_hash = article.id_hash();
        let existing = self
            .repo
            .find_existing(feed_id, ID_HASH_FIELD, std::slice::from_ref(&id_hash))
            .await?;
        Ok(!existing.contains(&id_hash))
    }

    /// Record the article's identity and the given comparison fields.
    pub async fn record(
        &self,
        feed_id: &str,
        article: &Article,
        comparison_fields: &[String],
    ) -> Result<()> {
        let now = Utc::now();
        let mut fingerprints = vec![self.identity(feed_id, article, now)];
        fingerprints.extend(self.field_fingerprints(feed_id, article, comparison_fields, now));
        self.commit(&fingerprints).await?;
        Ok(())
    }

    /// Persist pending fingerprints. Already-stored values are skipped.
    pub async fn commit(&self, fingerprints: &[FieldFingerprint]) -> Result<u64> {
        if fingerprints.is_empty() {
            return Ok(0);
        }
        self.repo.insert_many(fingerprints).await
    }

    /// Whether any article identity was ever recorded for the feed.
    pub async fn has_prior_articles(&self, feed_id: &str) -> Result<bool> {
        self.repo.has_field(feed_id, ID_HASH_FIELD).await
    }

    /// Remove all fingerprints of a feed.
    pub async fn purge(&self, feed_id: &str) -> Result<u64> {
        self.repo.delete_by_feed(feed_id).await
    }

    /// Compare a feed refresh against stored fingerprints and pick the articles to deliver.
    ///
    /// Reads only. The returned selection carries the fingerprints to store
    /// through [`FingerprintStore::commit`] once delivery is done, so that an
    /// aborted run selects the same articles again.
    pub async fn compare(
        &self,
        feed_id: &str,
        articles: &[Article],
        options: &ComparisonOptions,
        now: DateTime<Utc>,
    ) -> Result<Selection> {
        let all_comparisons = options.all_comparisons();

        if articles.is_empty() {
            return Ok(Selection::default());
        }

        if !self.has_prior_articles(feed_id).await? && options.skip_initial_articles {
            debug!(
                "Feed {} has no stored articles, seeding {} article(s)",
                feed_id,
                articles.len()
            );
            let mut pending = Vec::new();
            for article in articles {
                pending.push(self.identity(feed_id, article, now));
                pending.extend(self.field_fingerprints(feed_id, article, &all_comparisons, now));
            }
            return Ok(Selection {
                first_run: true,
                pending,
                ..Selection::default()
            });
        }

        // Comparisons only take effect once values for them have been stored.
        let mut active = HashSet::new();
        for name in &all_comparisons {
            if self.repo.has_field(feed_id, name).await? {
                active.insert(name.clone());
            }
        }

        let id_hashes: Vec<String> = articles.iter().map(Article::id_hash).collect();
        let seen_ids = self
            .repo
            .find_existing(feed_id, ID_HASH_FIELD, &id_hashes)
            .await?;

        let (new_articles, seen_articles): (Vec<&Article>, Vec<&Article>) = articles
            .iter()
            .partition(|article| !seen_ids.contains(&article.id_hash()));

        let active_blocking: Vec<String> = options
            .blocking_comparisons
            .iter()
            .filter(|name| active.contains(*name))
            .cloned()
            .collect();
        let active_passing: Vec<String> = options
            .passing_comparisons
            .iter()
            .filter(|name| active.contains(*name))
            .cloned()
            .collect();

        let mut past_blocks = Vec::new();
        for article in &new_articles {
            if !self
                .any_field_seen(feed_id, article, &active_blocking)
                .await?
            {
                past_blocks.push(*article);
            }
        }

        let mut passed = Vec::new();
        if !active_passing.is_empty() {
            for article in &seen_articles {
                let has_values = active_passing
                    .iter()
                    .any(|name| article.get(name).is_some_and(|v| !v.is_empty()));
                if has_values
                    && !self
                        .any_field_seen(feed_id, article, &active_passing)
                        .await?
                {
                    passed.push(*article);
                }
            }
        }

        let mut candidates: Vec<Article> = past_blocks
            .iter()
            .chain(passed.iter())
            .map(|article| (*article).clone())
            .collect();
        candidates.reverse();

        let deliver = match options.max_article_age {
            Some(max_age) => {
                let date_fields: Vec<&str> = if options.date_fields.is_empty() {
                    DEFAULT_DATE_FIELDS.to_vec()
                } else {
                    options.date_fields.iter().map(String::as_str).collect()
                };
                candidates
                    .into_iter()
                    .filter(|article| within_age(article, &date_fields, max_age, now))
                    .collect()
            }
            None => candidates,
        };

        let mut pending = Vec::new();
        for article in &new_articles {
            pending.push(self.identity(feed_id, article, now));
            pending.extend(self.field_fingerprints(feed_id, article, &all_comparisons, now));
        }
        for article in &passed {
            pending.extend(self.field_fingerprints(feed_id, article, &active_passing, now));
        }
        let unstored: Vec<String> = all_comparisons
            .iter()
            .filter(|name| !active.contains(*name))
            .cloned()
            .collect();
        if !unstored.is_empty() {
            for article in &seen_articles {
                pending.extend(self.field_fingerprints(feed_id, article, &unstored, now));
            }
        }

        debug!(
            "Feed {}: {} new, {} blocked, {} passed, {} to deliver",
            feed_id,
            new_articles.len(),
            new_articles.len() - past_blocks.len(),
            passed.len(),
            deliver.len()
        );

        Ok(Selection {
            blocked: new_articles.len() - past_blocks.len(),
            passed: passed.len(),
            deliver,
            first_run: false,
            pending,
        })
    }

    async fn any_field_seen(
        &self,
        feed_id: &str,
        article: &Article,
        fields: &[String],
    ) -> Result<bool> {
        for name in fields {
            let Some(value) = article.get(name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let (stored, _) = self.policy.fingerprint_value(value);
            let found = self
                .repo
                .find_existing(feed_id, name, std::slice::from_ref(&stored))
                .await?;
            if !found.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn identity(&self, feed_id: &str, article: &Article, now: DateTime<Utc>) -> FieldFingerprint {
        FieldFingerprint {
            feed_id: feed_id.to_string(),
            field_name: ID_HASH_FIELD.to_string(),
            field_value: article.id_hash(),
            is_hashed: false,
            created_at: now,
        }
    }

    fn field_fingerprints(
        &self,
        feed_id: &str,
        article: &Article,
        fields: &[String],
        now: DateTime<Utc>,
    ) -> Vec<FieldFingerprint> {
        let unique: BTreeSet<&String> = fields.iter().collect();
        unique
            .into_iter()
            .filter(|name| name.as_str() != ID_HASH_FIELD)
            .filter_map(|name| {
                let value = article.get(name).filter(|v| !v.is_empty())?;
                let (field_value, is_hashed) = self.policy.fingerprint_value(value);
                Some(FieldFingerprint {
                    feed_id: feed_id.to_string(),
                    field_name: name.clone(),
                    field_value,
                    is_hashed,
                    created_at: now,
                })
            })
            .collect()
    }
}

/// Parse a feed date in the formats feeds commonly use.
pub fn parse_article_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Articles without a parseable date, or dated in the future, pass.
fn within_age(
    article: &Article,
    date_fields: &[&str],
    max_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    for field in date_fields {
        let value = article
            .raw
            .get(*field)
            .map(String::as_str)
            .or_else(|| article.get(field));
        if let Some(date) = value.and_then(parse_article_date) {
            return now - date <= max_age;
        }
    }
    true
}
