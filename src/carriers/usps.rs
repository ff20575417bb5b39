//! USPS Web Tools TrackV2 (XML over GET, `USERID` attribute).

use chrono::{NaiveDate, NaiveTime};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{join_location, required, TrackingProvider};
use crate::error::{TrackingError, TrackingResult};
use crate::http::HttpRequest;
use crate::models::{Carrier, Credentials, PackageStatus, TrackingEvent, TrackingSnapshot};

const TRACK_URL: &str = "https://secure.shippingapis.com/ShippingAPI.dll";

#[derive(Debug, Clone, Copy, Default)]
pub struct Usps;

impl TrackingProvider for Usps {
    fn carrier(&self) -> Carrier {
        Carrier::Usps
    }

    /// USPS reports prose ("Delivered, In/At Mailbox"), so match on substrings.
    fn map_status(&self, raw: &str) -> PackageStatus {
        let raw = raw.to_lowercase();
        if raw.contains("delivered") {
            PackageStatus::Delivered
        } else if raw.contains("out for delivery") {
            PackageStatus::OutForDelivery
        } else if raw.contains("in transit") || raw.contains("departed") {
            PackageStatus::InTransit
        } else if raw.contains("acceptance") {
            PackageStatus::Pickup
        } else {
            PackageStatus::Unknown
        }
    }

    fn build_request(
        &self,
        tracking_number: &str,
        credentials: &Credentials,
    ) -> TrackingResult<HttpRequest> {
        let user_id = required(Carrier::Usps, &credentials.user_id, "user_id")?;
        let xml = format!(
            r#"<TrackRequest USERID="{}"><TrackID ID="{}"/></TrackRequest>"#,
            escape(user_id),
            escape(tracking_number.trim()),
        );
        let url = url::Url::parse_with_params(TRACK_URL, &[("API", "TrackV2"), ("XML", xml.as_str())])
            .map_err(|e| TrackingError::carrier_api(Carrier::Usps, None, e.to_string()))?;

        Ok(HttpRequest::get(url.as_str()))
    }

    fn parse_response(&self, body: &str) -> TrackingResult<Option<TrackingSnapshot>> {
        let doc = TrackDocument::read(body)?;

        if let Some(message) = doc.request_error {
            return Err(TrackingError::carrier_api(Carrier::Usps, None, message));
        }
        if !doc.has_track_info {
            return Err(TrackingError::parse(Carrier::Usps, "response has no TrackInfo element"));
        }
        if doc.shipment_error {
            return Ok(None);
        }

        let events: Vec<TrackingEvent> = doc.entries.iter().map(Entry::to_event).collect();
        let raw_status = doc
            .status
            .or_else(|| events.first().and_then(|e| e.description.clone()))
            .unwrap_or_default();
        let status = match self.map_status(&raw_status) {
            // Some accounts only get the summary sentence, not the short status.
            PackageStatus::Unknown => doc
                .status_summary
                .as_deref()
                .map(|s| self.map_status(s))
                .unwrap_or(PackageStatus::Unknown),
            known => known,
        };

        Ok(Some(TrackingSnapshot {
            status,
            raw_status,
            location: events.first().and_then(|e| e.location.clone()),
            estimated_delivery: doc.expected_delivery.map(|d| normalize_date(&d)),
            events,
        }))
    }
}

/// Fields pulled out of a TrackV2 response in one streaming pass.
#[derive(Debug, Default)]
struct TrackDocument {
    has_track_info: bool,
    shipment_error: bool,
    request_error: Option<String>,
    status: Option<String>,
    status_summary: Option<String>,
    expected_delivery: Option<String>,
    entries: Vec<Entry>,
}

/// One `TrackSummary` or `TrackDetail` element, either free text or
/// structured `Event*` children.
#[derive(Debug, Default)]
struct Entry {
    text: Option<String>,
    event: Option<String>,
    date: Option<String>,
    time: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    code: Option<String>,
}

impl TrackDocument {
    fn read(body: &str) -> TrackingResult<Self> {
        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);

        let mut doc = Self::default();
        let mut path: Vec<String> = Vec::new();
        let mut entry: Option<Entry> = None;
        let mut saw_root = false;

        loop {
            let event = reader.read_event().map_err(|e| {
                TrackingError::parse(
                    Carrier::Usps,
                    format!("{e} at byte {}", reader.error_position()),
                )
            })?;
            match event {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                    doc.open(&path, &name, &mut entry);
                    saw_root = true;
                    path.push(name);
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                    doc.open(&path, &name, &mut entry);
                    saw_root = true;
                    path.push(name);
                    doc.close(&path, &mut entry);
                    path.pop();
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| TrackingError::parse(Carrier::Usps, e))?;
                    doc.text(&path, text.trim(), &mut entry);
                }
                Event::End(_) => {
                    doc.close(&path, &mut entry);
                    path.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(TrackingError::parse(Carrier::Usps, "empty document"));
        }
        if !path.is_empty() {
            return Err(TrackingError::parse(
                Carrier::Usps,
                format!("document ended inside <{}>", path.join("/")),
            ));
        }
        Ok(doc)
    }

    fn open(&mut self, path: &[String], name: &str, entry: &mut Option<Entry>) {
        match (path.last().map(String::as_str), name) {
            (_, "TrackInfo") => self.has_track_info = true,
            (Some("TrackInfo"), "Error") => self.shipment_error = true,
            (None, "Error") => self.request_error = Some("USPS rejected the request".into()),
            (Some("TrackInfo"), "TrackSummary" | "TrackDetail") => *entry = Some(Entry::default()),
            _ => {}
        }
    }

    fn close(&mut self, path: &[String], entry: &mut Option<Entry>) {
        let closing = path.last().map(String::as_str);
        let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
        if parent == Some("TrackInfo") && matches!(closing, Some("TrackSummary" | "TrackDetail")) {
            if let Some(done) = entry.take() {
                self.entries.push(done);
            }
        }
    }

    fn text(&mut self, path: &[String], text: &str, entry: &mut Option<Entry>) {
        if text.is_empty() {
            return;
        }
        let value = Some(text.to_string());
        let n = path.len();
        let leaf = path.last().map(String::as_str);
        let parent = n.checked_sub(2).map(|i| path[i].as_str());

        if path.first().map(String::as_str) == Some("Error") {
            if leaf == Some("Description") {
                self.request_error = value;
            }
            return;
        }

        match (parent, leaf) {
            (Some("TrackInfo"), Some("Status")) => self.status = value,
            (Some("TrackInfo"), Some("StatusSummary")) => self.status_summary = value,
            (Some("TrackInfo"), Some("ExpectedDeliveryDate")) => self.expected_delivery = value,
            (Some("TrackInfo"), Some("PredictedDeliveryDate")) => {
                self.expected_delivery.get_or_insert(text.to_string());
            }
            (Some("TrackInfo"), Some("TrackSummary" | "TrackDetail")) => {
                if let Some(e) = entry.as_mut() {
                    e.text = value;
                }
            }
            (Some("TrackSummary" | "TrackDetail"), Some(field)) => {
                let Some(e) = entry.as_mut() else { return };
                match field {
                    "Event" => e.event = value,
                    "EventDate" => e.date = value,
                    "EventTime" => e.time = value,
                    "EventCity" => e.city = value,
                    "EventState" => e.state = value,
                    "EventCountry" => e.country = value,
                    "EventCode" => e.code = value,
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

impl Entry {
    fn to_event(&self) -> TrackingEvent {
        TrackingEvent {
            timestamp: self
                .date
                .as_deref()
                .map(|d| normalize_timestamp(d, self.time.as_deref())),
            description: self.event.clone().or_else(|| self.text.clone()),
            location: join_location(&[
                self.city.as_deref(),
                self.state.as_deref(),
                self.country.as_deref(),
            ]),
            code: self.code.clone(),
        }
    }
}

/// `January 10, 2026` → `2026-01-10`; unrecognized text is kept as-is.
fn normalize_date(date: &str) -> String {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%B %d, %Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| date.to_string())
}

fn normalize_timestamp(date: &str, time: Option<&str>) -> String {
    let parsed_date = NaiveDate::parse_from_str(date.trim(), "%B %d, %Y").ok();
    let parsed_time = time.and_then(|t| NaiveTime::parse_from_str(t.trim(), "%I:%M %p").ok());
    match (parsed_date, parsed_time, time) {
        (Some(d), Some(t), _) => d.and_time(t).format("%Y-%m-%dT%H:%M:%S").to_string(),
        (Some(d), None, _) => d.format("%Y-%m-%d").to_string(),
        (None, _, Some(t)) if !t.trim().is_empty() => format!("{} {}", date.trim(), t.trim()),
        (None, _, _) => date.trim().to_string(),
    }
}
