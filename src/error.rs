//! Error taxonomy for tracking reconciliation.
//!
//! Per-package failures never abort a batch: they are collected into
//! [`BatchError`](crate::models::BatchError) entries using [`TrackingError::kind`].
//! Only failures before the batch starts surface as an HTTP 500.

use std::time::Duration;

use crate::models::Carrier;

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Non-2xx response or network failure talking to a carrier.
    #[error("{carrier} API error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    CarrierApi {
        carrier: Carrier,
        status: Option<u16>,
        message: String,
    },

    /// Malformed vendor payload.
    #[error("{carrier} payload could not be parsed: {message}")]
    Parse { carrier: Carrier, message: String },

    /// Row-store read or write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{carrier} credential is missing `{field}`")]
    MissingCredential {
        carrier: Carrier,
        field: &'static str,
    },

    #[error("unsupported carrier: {0}")]
    UnsupportedCarrier(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The row changed underneath a conditional write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TrackingError {
    /// Stable machine-readable discriminator used in batch responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CarrierApi { .. } => "carrier_api",
            Self::Parse { .. } => "parse",
            Self::Persistence(_) => "persistence",
            Self::MissingCredential { .. } => "missing_credential",
            Self::UnsupportedCarrier(_) => "unsupported_carrier",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidRequest(_) | Self::UnsupportedCarrier(_) => 400,
            Self::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Whether another attempt at the same carrier call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CarrierApi { status: None, .. } => true,
            Self::CarrierApi {
                status: Some(status),
                ..
            } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    pub fn carrier_api(carrier: Carrier, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::CarrierApi {
            carrier,
            status,
            message: message.into(),
        }
    }

    pub fn parse(carrier: Carrier, message: impl ToString) -> Self {
        Self::Parse {
            carrier,
            message: message.to_string(),
        }
    }

    pub fn persistence(err: impl ToString) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// HTTP statuses treated as transient carrier failures.
pub const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 502, 503, 504];

/// Failure of the outbound HTTP exchange itself (no response received).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

/// D1 and binding failures surface as persistence errors.
impl From<worker::Error> for TrackingError {
    fn from(err: worker::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<TrackingError> for worker::Error {
    fn from(err: TrackingError) -> Self {
        worker::Error::RustError(err.to_string())
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_api_display_includes_status_when_known() {
        let err = TrackingError::carrier_api(Carrier::Ups, Some(503), "service unavailable");
        assert_eq!(err.to_string(), "ups API error (503): service unavailable");

        let err = TrackingError::carrier_api(Carrier::Dhl, None, "connection reset");
        assert_eq!(err.to_string(), "dhl API error: connection reset");
    }

    #[test]
    fn transient_classification() {
        assert!(TrackingError::carrier_api(Carrier::Ups, None, "reset").is_transient());
        assert!(TrackingError::carrier_api(Carrier::Ups, Some(429), "slow down").is_transient());
        assert!(TrackingError::carrier_api(Carrier::Ups, Some(504), "gateway").is_transient());
        assert!(!TrackingError::carrier_api(Carrier::Ups, Some(401), "denied").is_transient());
        assert!(!TrackingError::parse(Carrier::Usps, "bad xml").is_transient());
        assert!(!TrackingError::persistence("locked").is_transient());
    }

    #[test]
    fn kinds_and_http_status() {
        assert_eq!(TrackingError::NotFound("integration x".into()).http_status(), 404);
        assert_eq!(TrackingError::InvalidRequest("body".into()).http_status(), 400);
        assert_eq!(TrackingError::persistence("down").http_status(), 500);
        assert_eq!(TrackingError::Conflict("package p1".into()).http_status(), 409);
        assert_eq!(TrackingError::parse(Carrier::Usps, "x").kind(), "parse");
        assert_eq!(
            TrackingError::MissingCredential {
                carrier: Carrier::Dhl,
                field: "api_key"
            }
            .kind(),
            "missing_credential"
        );
    }

    #[test]
    fn transport_timeout_display() {
        let err = TransportError::Timeout(Duration::from_millis(2500));
        assert_eq!(err.to_string(), "request timed out after 2500ms");
    }
}
