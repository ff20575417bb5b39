//! FedEx Track API v1 (REST + JSON, OAuth bearer token).

use serde::Deserialize;

use super::{join_location, non_empty, required, TrackingProvider};
use crate::error::{TrackingError, TrackingResult};
use crate::http::HttpRequest;
use crate::models::{Carrier, Credentials, PackageStatus, TrackingEvent, TrackingSnapshot};

const TRACK_URL: &str = "https://apis.fedex.com/track/v1/trackingnumbers";

#[derive(Debug, Clone, Copy, Default)]
pub struct Fedex;

impl TrackingProvider for Fedex {
    fn carrier(&self) -> Carrier {
        Carrier::Fedex
    }

    fn map_status(&self, raw: &str) -> PackageStatus {
        match raw.trim() {
            "DL" => PackageStatus::Delivered,
            "IT" => PackageStatus::InTransit,
            "OD" => PackageStatus::OutForDelivery,
            "PU" => PackageStatus::Pickup,
            "EX" => PackageStatus::Exception,
            "SH" => PackageStatus::Shipped,
            _ => PackageStatus::Unknown,
        }
    }

    fn build_request(
        &self,
        tracking_number: &str,
        credentials: &Credentials,
    ) -> TrackingResult<HttpRequest> {
        let token = required(Carrier::Fedex, &credentials.access_token, "access_token")?;
        let body = serde_json::json!({
            "trackingInfo": [{
                "trackingNumberInfo": { "trackingNumber": tracking_number.trim() }
            }],
            "includeDetailedScans": true,
        });

        Ok(HttpRequest::post(TRACK_URL, body.to_string())
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json"))
    }

    fn parse_response(&self, body: &str) -> TrackingResult<Option<TrackingSnapshot>> {
        let envelope: TrackEnvelope =
            serde_json::from_str(body).map_err(|e| TrackingError::parse(Carrier::Fedex, e))?;

        let Some(result) = envelope
            .output
            .and_then(|o| o.complete_track_results.into_iter().next())
            .and_then(|c| c.track_results.into_iter().next())
        else {
            return Ok(None);
        };

        // A per-result error object (e.g. TRACKING.TRACKINGNUMBER.NOTFOUND)
        // means FedEx has no shipment for this number.
        if result.error.is_some() {
            return Ok(None);
        }

        let raw_status = result
            .latest_status_detail
            .as_ref()
            .and_then(|d| d.code.clone())
            .unwrap_or_default();

        let location = result
            .latest_status_detail
            .as_ref()
            .and_then(|d| d.scan_location.as_ref())
            .and_then(FedexAddress::describe);

        let estimated_delivery = result
            .estimated_delivery_time_window
            .and_then(|w| w.window)
            .and_then(|w| non_empty(w.ends));

        let events = result.scan_events.iter().map(ScanEvent::to_event).collect();

        Ok(Some(TrackingSnapshot {
            status: self.map_status(&raw_status),
            raw_status,
            events,
            estimated_delivery,
            location,
        }))
    }
}

// ── Vendor envelope ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TrackEnvelope {
    output: Option<Output>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    #[serde(default)]
    complete_track_results: Vec<CompleteTrackResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTrackResult {
    #[serde(default)]
    track_results: Vec<TrackResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackResult {
    latest_status_detail: Option<StatusDetail>,
    #[serde(default)]
    scan_events: Vec<ScanEvent>,
    estimated_delivery_time_window: Option<TimeWindow>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusDetail {
    code: Option<String>,
    scan_location: Option<FedexAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanEvent {
    date: Option<String>,
    event_type: Option<String>,
    event_description: Option<String>,
    scan_location: Option<FedexAddress>,
}

impl ScanEvent {
    fn to_event(&self) -> TrackingEvent {
        TrackingEvent {
            timestamp: non_empty(self.date.clone()),
            description: non_empty(self.event_description.clone()),
            location: self.scan_location.as_ref().and_then(FedexAddress::describe),
            code: non_empty(self.event_type.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexAddress {
    city: Option<String>,
    state_or_province_code: Option<String>,
    country_code: Option<String>,
}

impl FedexAddress {
    fn describe(&self) -> Option<String> {
        join_location(&[
            self.city.as_deref(),
            self.state_or_province_code.as_deref(),
            self.country_code.as_deref(),
        ])
    }
}

#[derive(Debug, Deserialize)]
struct TimeWindow {
    window: Option<Window>,
}

#[derive(Debug, Deserialize)]
struct Window {
    ends: Option<String>,
}
