//! UPS Track API v1 (REST + JSON, OAuth bearer token).

use serde::Deserialize;

use super::{expand_compact_date, expand_compact_datetime, join_location, non_empty, required};
use super::TrackingProvider;
use crate::error::{TrackingError, TrackingResult};
use crate::http::HttpRequest;
use crate::models::{Carrier, Credentials, PackageStatus, TrackingEvent, TrackingSnapshot};

const TRACK_URL: &str = "https://onlinetools.ups.com/api/track/v1/details/";

#[derive(Debug, Clone, Copy, Default)]
pub struct Ups;

impl TrackingProvider for Ups {
    fn carrier(&self) -> Carrier {
        Carrier::Ups
    }

    fn map_status(&self, raw: &str) -> PackageStatus {
        match raw.trim() {
            "I" => PackageStatus::InTransit,
            "D" => PackageStatus::Delivered,
            "X" => PackageStatus::Exception,
            "P" | "M" => PackageStatus::Pickup,
            _ => PackageStatus::Unknown,
        }
    }

    fn build_request(
        &self,
        tracking_number: &str,
        credentials: &Credentials,
    ) -> TrackingResult<HttpRequest> {
        let token = required(Carrier::Ups, &credentials.access_token, "access_token")?;
        let mut url = url::Url::parse(TRACK_URL)
            .map_err(|e| TrackingError::carrier_api(Carrier::Ups, None, e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| TrackingError::carrier_api(Carrier::Ups, None, "invalid base url"))?
            .pop_if_empty()
            .push(tracking_number.trim());

        Ok(HttpRequest::get(url.as_str())
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json"))
    }

    fn parse_response(&self, body: &str) -> TrackingResult<Option<TrackingSnapshot>> {
        let envelope: TrackEnvelope =
            serde_json::from_str(body).map_err(|e| TrackingError::parse(Carrier::Ups, e))?;

        let Some(package) = envelope
            .track_response
            .and_then(|r| r.shipment.into_iter().next())
            .and_then(|s| s.package.into_iter().next())
        else {
            return Ok(None);
        };

        let raw_status = package
            .current_status
            .as_ref()
            .and_then(|s| s.kind.clone())
            .or_else(|| {
                package
                    .activity
                    .first()
                    .and_then(|a| a.status.as_ref())
                    .and_then(|s| s.kind.clone())
            })
            .unwrap_or_default();

        let location = package
            .activity
            .first()
            .and_then(|a| a.location.as_ref())
            .and_then(Location::describe);

        let estimated_delivery = package
            .delivery_date
            .iter()
            .find_map(|d| non_empty(d.date.clone()))
            .map(|d| expand_compact_date(&d));

        let events = package.activity.iter().map(Activity::to_event).collect();

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
#[serde(rename_all = "camelCase")]
struct TrackEnvelope {
    track_response: Option<TrackResponse>,
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    shipment: Vec<Shipment>,
}

#[derive(Debug, Deserialize)]
struct Shipment {
    #[serde(default)]
    package: Vec<UpsPackage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsPackage {
    current_status: Option<StatusInfo>,
    #[serde(default)]
    activity: Vec<Activity>,
    #[serde(default)]
    delivery_date: Vec<DeliveryDate>,
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    location: Option<Location>,
    status: Option<StatusInfo>,
    date: Option<String>,
    time: Option<String>,
}

impl Activity {
    fn to_event(&self) -> TrackingEvent {
        TrackingEvent {
            timestamp: self
                .date
                .as_deref()
                .map(|d| expand_compact_datetime(d, self.time.as_deref())),
            description: self
                .status
                .as_ref()
                .and_then(|s| non_empty(s.description.clone())),
            location: self.location.as_ref().and_then(Location::describe),
            code: self.status.as_ref().and_then(|s| {
                non_empty(s.kind.clone()).or_else(|| non_empty(s.code.clone()))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Location {
    address: Option<Address>,
}

impl Location {
    fn describe(&self) -> Option<String> {
        let address = self.address.as_ref()?;
        join_location(&[
            address.city.as_deref(),
            address.state_province.as_deref(),
            address.country_code.as_deref(),
        ])
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Address {
    city: Option<String>,
    state_province: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeliveryDate {
    date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN_TRANSIT: &str = r#"{
      "trackResponse": {
        "shipment": [{
          "package": [{
            "trackingNumber": "1Z12345E0205271688",
            "currentStatus": { "type": "I", "description": "On the Way", "code": "OR" },
            "deliveryDate": [{ "type": "SDD", "date": "20260112" }],
            "activity": [
              {
                "location": { "address": { "city": "Louisville", "stateProvince": "KY", "countryCode": "US" } },
                "status": { "type": "I", "description": "Departed from Facility", "code": "DP" },
                "date": "20260110", "time": "031500"
              },
              {
                "location": { "address": { "city": "Atlanta", "stateProvince": "GA", "countryCode": "US" } },
                "status": { "type": "P", "description": "Pickup Scan", "code": "PU" },
                "date": "20260109", "time": "180000"
              }
            ]
          }]
        }]
      }
    }"#;

    #[test]
    fn status_table() {
        assert_eq!(Ups.map_status("I"), PackageStatus::InTransit);
        assert_eq!(Ups.map_status("D"), PackageStatus::Delivered);
        assert_eq!(Ups.map_status("X"), PackageStatus::Exception);
        assert_eq!(Ups.map_status("P"), PackageStatus::Pickup);
        assert_eq!(Ups.map_status("M"), PackageStatus::Pickup);
        assert_eq!(Ups.map_status("d"), PackageStatus::Unknown);
        assert_eq!(Ups.map_status("Q"), PackageStatus::Unknown);
    }

    #[test]
    fn request_uses_bearer_token_and_path() {
        let creds = Credentials {
            access_token: Some("abc".into()),
            ..Default::default()
        };
        let req = Ups.build_request("1Z12345E0205271688", &creds).unwrap();
        assert_eq!(
            req.url,
            "https://onlinetools.ups.com/api/track/v1/details/1Z12345E0205271688"
        );
        assert_eq!(req.header_value("Authorization"), Some("Bearer abc"));
    }

    #[test]
    fn request_escapes_path_segment() {
        let creds = Credentials {
            access_token: Some("abc".into()),
            ..Default::default()
        };
        let req = Ups.build_request("1Z/../admin", &creds).unwrap();
        assert!(req.url.ends_with("/details/1Z%2F..%2Fadmin"));
    }

    #[test]
    fn request_requires_token() {
        let err = Ups.build_request("1Z", &Credentials::default()).unwrap_err();
        assert!(matches!(
            err,
            TrackingError::MissingCredential {
                carrier: Carrier::Ups,
                field: "access_token"
            }
        ));
    }

    #[test]
    fn parses_in_transit_package() {
        let snap = Ups.parse_response(IN_TRANSIT).unwrap().unwrap();
        assert_eq!(snap.status, PackageStatus::InTransit);
        assert_eq!(snap.raw_status, "I");
        assert_eq!(snap.estimated_delivery.as_deref(), Some("2026-01-12"));
        assert_eq!(snap.location.as_deref(), Some("Louisville, KY, US"));
        assert_eq!(snap.events.len(), 2);
        assert_eq!(snap.events[0].timestamp.as_deref(), Some("2026-01-10T03:15:00"));
        assert_eq!(
            snap.events[0].description.as_deref(),
            Some("Departed from Facility")
        );
        assert_eq!(snap.events[1].code.as_deref(), Some("P"));
    }

    #[test]
    fn falls_back_to_latest_activity_status() {
        let body = r#"{"trackResponse":{"shipment":[{"package":[{
            "activity":[{"status":{"type":"D","description":"DELIVERED"},"date":"20260110"}]
        }]}]}}"#;
        let snap = Ups.parse_response(body).unwrap().unwrap();
        assert_eq!(snap.status, PackageStatus::Delivered);
    }

    #[test]
    fn missing_package_is_none() {
        let body = r#"{"trackResponse":{"shipment":[{"warnings":[{"code":"TW0001","message":"Tracking Information Not Found"}]}]}}"#;
        assert!(Ups.parse_response(body).unwrap().is_none());
        assert!(Ups.parse_response("{}").unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Ups.parse_response("<html>").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
