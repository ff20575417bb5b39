use serde::{Deserialize, Serialize};

use super::{Carrier, PackageStatus};
use crate::error::TrackingError;

// ── API request/response types ──────────────────────────────────

/// One per-package (or per-integration) failure inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<Carrier>,
    pub kind: String,
    pub message: String,
}

impl BatchError {
    pub fn for_package(tracking_number: &str, carrier: Carrier, err: &TrackingError) -> Self {
        Self {
            tracking_number: Some(tracking_number.to_string()),
            carrier: Some(carrier),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn for_carrier(carrier: Option<Carrier>, err: &TrackingError) -> Self {
        Self {
            tracking_number: None,
            carrier,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Per-carrier slice of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CarrierSyncResult {
    pub carrier: Carrier,
    pub integration_id: String,
    pub packages_processed: usize,
    pub packages_updated: usize,
    pub notifications_queued: usize,
    pub errors: usize,
    pub execution_time_ms: i64,
}

/// Body returned by the sync endpoints and logged by the cron handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub packages_updated: usize,
    #[serde(default)]
    pub results: Vec<CarrierSyncResult>,
    #[serde(default)]
    pub errors: Vec<BatchError>,
}

impl SyncResponse {
    /// A batch that found nothing to do.
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            packages_updated: 0,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub message: String,
    pub response_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusOverrideResponse {
    pub package_id: String,
    pub previous_status: PackageStatus,
    pub status: PackageStatus,
    pub notification_queued: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}
