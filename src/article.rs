//! Parsed feed articles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the identity field every article carries.
pub const ID_HASH_FIELD: &str = "idHash";

/// Default raw fields consulted for an article's publication date.
pub const DEFAULT_DATE_FIELDS: &[&str] = &["date", "pubdate"];

/// SHA-256 hex digest of a string.
pub fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// A parsed article, immutable once produced by the feed parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Flattened field name to string value mapping.
    pub flattened: BTreeMap<String, String>,
    /// Original values of date-like fields.
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

impl Article {
    /// Create an article from its flattened fields.
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            flattened: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            raw: BTreeMap::new(),
        }
    }

    /// Set a raw field.
    pub fn with_raw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.insert(name.into(), value.into());
        self
    }

    /// Look up a flattened field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.flattened.get(field).map(String::as_str)
    }

    /// Identity hash of the article.
    ///
    /// An explicit `idHash` field wins. Otherwise the digest covers
    /// title and link, then link alone, then `id`/`guid`, then every field.
    pub fn id_hash(&self) -> String {
        if let Some(id_hash) = self.get(ID_HASH_FIELD).filter(|v| !v.is_empty()) {
            return id_hash.to_string();
        }

        let non_empty = |name: &str| self.get(name).filter(|v| !v.is_empty());

        match (non_empty("title"), non_empty("link")) {
            (Some(title), Some(link)) => digest(&format!("{title}{link}")),
            (None, Some(link)) => digest(link),
            _ => match non_empty("id").or_else(|| non_empty("guid")) {
                Some(id) => digest(id),
                None => {
                    let joined = self
                        .flattened
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    digest(&joined)
                }
            },
        }
    }
}
