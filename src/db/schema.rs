//! Database schema and migrations for feedrelay.
//!
//! Migrations are applied sequentially when the database is opened.
//! Timestamps are stored as Unix epoch milliseconds so that sliding-window
//! queries compare integers.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Seen-article markers per feed
    r#"
CREATE TABLE article_fingerprints (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id      TEXT NOT NULL,
    field_name   TEXT NOT NULL,
    field_value  TEXT NOT NULL,            -- raw value or SHA-256 hex digest
    is_hashed    INTEGER NOT NULL DEFAULT 1,
    created_at   INTEGER NOT NULL
);

CREATE UNIQUE INDEX idx_article_fingerprints_lookup
    ON article_fingerprints(feed_id, field_name, field_value);
"#,
    // v2: Delivery outcomes, one row per attempted (article, connection)
    r#"
CREATE TABLE delivery_records (
    id                TEXT PRIMARY KEY,    -- UUID v4
    event_id          TEXT NOT NULL,
    feed_id           TEXT NOT NULL,
    connection_id     TEXT NOT NULL,
    article_id_hash   TEXT NOT NULL,
    status            TEXT NOT NULL,       -- 'sent', 'failed', 'filtered-out'
    error_code        TEXT,
    internal_message  TEXT,
    created_at        INTEGER NOT NULL
);

CREATE UNIQUE INDEX idx_delivery_records_dedup
    ON delivery_records(event_id, connection_id, article_id_hash);
CREATE INDEX idx_delivery_records_feed_connection
    ON delivery_records(feed_id, connection_id, created_at);
CREATE INDEX idx_delivery_records_article
    ON delivery_records(article_id_hash);
"#,
    // v3: Consecutive rejection counters, feed scope uses an empty connection id
    r#"
CREATE TABLE feed_retry_records (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id          TEXT NOT NULL,
    connection_id    TEXT NOT NULL DEFAULT '',
    attempts_so_far  INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE UNIQUE INDEX idx_feed_retry_records_scope
    ON feed_retry_records(feed_id, connection_id);
"#,
    // v4: Rate limit reservations backing the daily and per-connection windows
    r#"
CREATE TABLE rate_limit_reservations (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id        TEXT NOT NULL,
    connection_id  TEXT NOT NULL,
    reserved_at    INTEGER NOT NULL
);

CREATE INDEX idx_rate_limit_reservations_feed
    ON rate_limit_reservations(feed_id, reserved_at);
CREATE INDEX idx_rate_limit_reservations_connection
    ON rate_limit_reservations(feed_id, connection_id, reserved_at);
"#,
    // v5: Per-feed processing leases
    r#"
CREATE TABLE feed_leases (
    feed_id     TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    expires_at  INTEGER NOT NULL
);
"#,
];
