//! Delivery outcomes, their records, and rejection backoff.

mod backoff;
mod client;
mod repository;
mod retry;
mod types;

pub use backoff::{BackoffController, DisableReason, DisableRequest, RejectionCode, RejectionScope};
pub use client::{classify, DeliveryClient, DeliveryResponse};
pub use repository::{DeliveryRecordRepository, SqlDeliveryRecordRepository};
pub use retry::{FeedRetryRecord, RetryRecordRepository, SqlRetryRecordRepository};
pub use types::{DeliveryOutcome, DeliveryRecord, DeliveryStatus, ErrorCode};
