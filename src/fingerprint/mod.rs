//! Fingerprint store.
//!
//! Tracks which article identities and comparison field values have been
//! seen per feed, and selects the articles of a refresh that are new.

mod repository;
mod store;
mod types;

pub use repository::{FingerprintRepository, SqlFingerprintRepository};
pub use store::{parse_article_date, ComparisonOptions, FingerprintStore, Selection};
pub use types::{FieldFingerprint, FingerprintPolicy, MAX_RAW_VALUE_LENGTH};
