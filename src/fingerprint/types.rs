//! Fingerprint types.

use chrono::{DateTime, Utc};

use crate::article::digest;

/// Raw values longer than this are always stored as digests.
pub const MAX_RAW_VALUE_LENGTH: usize = 256;

/// A "seen" marker for one field value of one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFingerprint {
    /// Feed the marker belongs to.
    pub feed_id: String,
    /// Article field name.
    pub field_name: String,
    /// Raw value or its SHA-256 hex digest.
    pub field_value: String,
    /// Whether `field_value` is a digest.
    pub is_hashed: bool,
    /// When the marker was stored.
    pub created_at: DateTime<Utc>,
}

/// How field values are turned into stored fingerprint values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintPolicy {
    /// Store comparison values as digests.
    pub hash_values: bool,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self { hash_values: true }
    }
}

impl FingerprintPolicy {
    /// Compute the stored form of a field value.
    ///
    /// Returns the value and whether it is a digest. Deterministic so that
    /// lookups and inserts agree.
    pub fn fingerprint_value(&self, value: &str) -> (String, bool) {
        if self.hash_values || value.chars().count() > MAX_RAW_VALUE_LENGTH {
            (digest(value), true)
        } else {
            (value.to_string(), false)
        }
    }
}
