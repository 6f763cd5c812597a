//! Pipeline orchestration.
//!
//! Composes the fingerprint store, filters, rate limiter, formatter and
//! delivery bookkeeping into one run per input event.

mod dispatch;
mod event;
mod lease;
mod orchestrator;

pub use dispatch::{Dispatched, Dispatcher};
pub use event::{DeliverArticlesEvent, FeedDetails, FeedRejectedEvent, InputEvent, OutputEvent};
pub use lease::{LeaseRepository, SqlLeaseRepository};
pub use orchestrator::{Pipeline, RunReport, Stores};
