//! Outbound delivery seam and response classification.

use async_trait::async_trait;

use super::backoff::RejectionCode;
use super::types::{DeliveryOutcome, ErrorCode};
use crate::connection::Connection;
use crate::format::MessagePayload;

/// What the downstream medium answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResponse {
    /// An HTTP-like status with its body.
    Status { status: u16, body: String },
    /// The call never produced a status.
    TransportError(String),
}

impl DeliveryResponse {
    pub fn ok() -> Self {
        DeliveryResponse::Status {
            status: 200,
            body: String::new(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        DeliveryResponse::Status {
            status,
            body: body.into(),
        }
    }
}

/// Sends formatted payloads to a connection's target.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(&self, connection: &Connection, payload: &MessagePayload) -> DeliveryResponse;
}

/// Map a response to its outcome and, for rejections that count toward
/// backoff, the rejection code.
pub fn classify(response: &DeliveryResponse) -> (DeliveryOutcome, Option<RejectionCode>) {
    let (status, body) = match response {
        DeliveryResponse::TransportError(message) => {
            return (
                DeliveryOutcome::failed(ErrorCode::Internal, message.clone()),
                None,
            );
        }
        DeliveryResponse::Status { status, body } => (*status, body),
    };

    let message = || {
        if body.is_empty() {
            format!("status {status}")
        } else {
            format!("status {status}: {body}")
        }
    };

    match status {
        200..=299 => (DeliveryOutcome::Sent, None),
        400 => (
            DeliveryOutcome::failed(ErrorCode::ThirdPartyBadRequest, message()),
            Some(RejectionCode::BadRequest),
        ),
        403 => (
            DeliveryOutcome::failed(ErrorCode::ThirdPartyForbidden, message()),
            Some(RejectionCode::Forbidden),
        ),
        404 => (
            DeliveryOutcome::failed(ErrorCode::ThirdPartyNotFound, message()),
            Some(RejectionCode::MediumNotFound),
        ),
        500..=599 => (
            DeliveryOutcome::failed(ErrorCode::ThirdPartyInternal, message()),
            None,
        ),
        _ => (DeliveryOutcome::failed(ErrorCode::Internal, message()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        for status in [200, 201, 204] {
            let (outcome, rejection) = classify(&DeliveryResponse::status(status, ""));
            assert_eq!(outcome, DeliveryOutcome::Sent);
            assert_eq!(rejection, None);
        }
    }

    #[test]
    fn test_rejections() {
        let cases = [
            (400, ErrorCode::ThirdPartyBadRequest, RejectionCode::BadRequest),
            (403, ErrorCode::ThirdPartyForbidden, RejectionCode::Forbidden),
            (404, ErrorCode::ThirdPartyNotFound, RejectionCode::MediumNotFound),
        ];
        for (status, code, rejection) in cases {
            let (outcome, got) = classify(&DeliveryResponse::status(status, "nope"));
            assert_eq!(outcome.error_code(), Some(code));
            assert_eq!(got, Some(rejection));
        }
    }

    #[test]
    fn test_server_error_does_not_count() {
        let (outcome, rejection) = classify(&DeliveryResponse::status(503, ""));
        assert_eq!(
            outcome,
            DeliveryOutcome::failed(ErrorCode::ThirdPartyInternal, "status 503")
        );
        assert_eq!(rejection, None);
    }

    #[test]
    fn test_other_failures_are_internal() {
        let (outcome, rejection) = classify(&DeliveryResponse::status(429, "slow down"));
        assert_eq!(
            outcome,
            DeliveryOutcome::failed(ErrorCode::Internal, "status 429: slow down")
        );
        assert_eq!(rejection, None);

        let (outcome, _) = classify(&DeliveryResponse::TransportError("reset".to_string()));
        assert_eq!(outcome.error_code(), Some(ErrorCode::Internal));
    }
}
