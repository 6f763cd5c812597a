//! Error types for feedrelay.

use thiserror::Error;

/// Common error type for feedrelay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for input events or configuration values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload formatting error.
    #[error("format error: {0}")]
    Format(#[from] crate::format::FormatError),

    /// A store call did not complete within the configured timeout.
    ///
    /// The run is aborted and may be retried from the top.
    #[error("store operation timed out: {0}")]
    StoreTimeout(String),

    /// Another run currently holds the lease for this feed.
    #[error("feed {0} is already being processed")]
    FeedBusy(String),

    /// A rejection code with no disable-reason mapping.
    #[error("unhandled rejection code: {0}")]
    UnhandledRejectionCode(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether redelivering the triggering event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Database(_) | RelayError::StoreTimeout(_) | RelayError::FeedBusy(_)
        )
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Database(e.to_string())
    }
}

/// Result type alias for feedrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = RelayError::Validation("missing feed id".to_string());
        assert_eq!(err.to_string(), "validation error: missing feed id");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = RelayError::NotFound("retry record".to_string());
        assert_eq!(err.to_string(), "retry record not found");
    }

    #[test]
    fn test_unhandled_rejection_code_display() {
        let err = RelayError::UnhandledRejectionCode("user-feeds/teapot".to_string());
        assert_eq!(
            err.to_string(),
            "unhandled rejection code: user-feeds/teapot"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: RelayError = json_err.into();
        assert!(matches!(err, RelayError::Json(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RelayError::StoreTimeout("fingerprint lookup".into()).is_retryable());
        assert!(RelayError::FeedBusy("feed-1".into()).is_retryable());
        assert!(RelayError::Database("locked".into()).is_retryable());
        assert!(!RelayError::UnhandledRejectionCode("x".into()).is_retryable());
        assert!(!RelayError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(RelayError::FeedBusy("feed-1".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
