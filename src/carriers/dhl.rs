//! DHL Shipment Tracking - Unified API (REST + JSON, `DHL-API-Key`).

use serde::Deserialize;

use super::{non_empty, required, TrackingProvider};
use crate::error::{TrackingError, TrackingResult};
use crate::http::HttpRequest;
use crate::models::{Carrier, Credentials, PackageStatus, TrackingEvent, TrackingSnapshot};

const TRACK_URL: &str = "https://api-eu.dhl.com/track/shipments";

#[derive(Debug, Clone, Copy, Default)]
pub struct Dhl;

impl TrackingProvider for Dhl {
    fn carrier(&self) -> Carrier {
        Carrier::Dhl
    }

    fn map_status(&self, raw: &str) -> PackageStatus {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delivered" => PackageStatus::Delivered,
            "transit" => PackageStatus::InTransit,
            "pickup" => PackageStatus::Pickup,
            "exception" => PackageStatus::Exception,
            _ => PackageStatus::Unknown,
        }
    }

    fn build_request(
        &self,
        tracking_number: &str,
        credentials: &Credentials,
    ) -> TrackingResult<HttpRequest> {
        let key = required(Carrier::Dhl, &credentials.api_key, "api_key")?;
        let url = url::Url::parse_with_params(TRACK_URL, &[("trackingNumber", tracking_number.trim())])
            .map_err(|e| TrackingError::carrier_api(Carrier::Dhl, None, e.to_string()))?;

        Ok(HttpRequest::get(url.as_str())
            .header("DHL-API-Key", key)
            .header("Content-Type", "application/json"))
    }

    fn parse_response(&self, body: &str) -> TrackingResult<Option<TrackingSnapshot>> {
        let envelope: TrackEnvelope =
            serde_json::from_str(body).map_err(|e| TrackingError::parse(Carrier::Dhl, e))?;

        let Some(shipment) = envelope.shipments.into_iter().next() else {
            return Ok(None);
        };

        let raw_status = shipment
            .status
            .as_ref()
            .and_then(|s| s.status_code.clone())
            .unwrap_or_default();
        let location = shipment.status.as_ref().and_then(DhlStatus::locality);

        Ok(Some(TrackingSnapshot {
            status: self.map_status(&raw_status),
            raw_status,
            events: shipment.events.iter().map(DhlStatus::to_event).collect(),
            estimated_delivery: non_empty(shipment.estimated_time_of_delivery),
            location,
        }))
    }

    /// The API answers 404 for tracking numbers it does not know.
    fn is_missing_shipment(&self, status: u16) -> bool {
        status == 404
    }
}

// ── Vendor envelope ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TrackEnvelope {
    #[serde(default)]
    shipments: Vec<Shipment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Shipment {
    status: Option<DhlStatus>,
    #[serde(default)]
    events: Vec<DhlStatus>,
    estimated_time_of_delivery: Option<String>,
}

/// Shape shared by `status` and each entry of `events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlStatus {
    timestamp: Option<String>,
    status_code: Option<String>,
    status: Option<String>,
    description: Option<String>,
    location: Option<DhlLocation>,
}

impl DhlStatus {
    fn locality(&self) -> Option<String> {
        self.location
            .as_ref()
            .and_then(|l| l.address.as_ref())
            .and_then(|a| non_empty(a.address_locality.clone()))
    }

    fn to_event(&self) -> TrackingEvent {
        TrackingEvent {
            timestamp: non_empty(self.timestamp.clone()),
            description: non_empty(self.description.clone())
                .or_else(|| non_empty(self.status.clone())),
            location: self.locality(),
            code: non_empty(self.status_code.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DhlLocation {
    address: Option<DhlAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlAddress {
    address_locality: Option<String>,
}
