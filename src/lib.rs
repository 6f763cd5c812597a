//! feedrelay - feed article delivery pipeline
//!
//! Turns parsed feed articles into deduplicated, filtered, rate-limited
//! messages for delivery connections, and records every outcome so that
//! repeated provider rejections disable the feed or connection.

pub mod article;
pub mod config;
pub mod connection;
pub mod db;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod rate_limit;

pub use article::Article;
pub use config::Config;
pub use connection::{Connection, DeliveryTarget};
pub use db::Database;
pub use delivery::{
    DeliveryClient, DeliveryOutcome, DeliveryResponse, DeliveryStatus, DisableReason, ErrorCode,
};
pub use error::{RelayError, Result};
pub use filter::FilterExpression;
pub use format::{FormatError, Formatter, MessagePayload};
pub use pipeline::{Dispatcher, InputEvent, OutputEvent, Pipeline, RunReport, Stores};
