//! Carrier tracking adapters.
//!
//! Each carrier implements [`TrackingProvider`]:
//! 1. A static status table translating vendor codes into [`PackageStatus`].
//! 2. A request builder binding the tracking number and stored credential.
//! 3. A parser turning the vendor envelope into a [`TrackingSnapshot`].
//!
//! [`fetch_tracking`] drives one lookup end to end, with bounded retries on
//! transient failures. Both sync entry points share these adapters.

mod dhl;
mod fedex;
mod ups;
mod usps;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{TrackingError, TrackingResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::models::{Carrier, Credentials, PackageStatus, TrackingSnapshot};

pub use dhl::Dhl;
pub use fedex::Fedex;
pub use ups::Ups;
pub use usps::Usps;

/// Tracking number used when probing a credential.
pub const PROBE_TRACKING_NUMBER: &str = "TEST";

const ERROR_BODY_SNIPPET: usize = 200;

pub trait TrackingProvider: Sync {
    fn carrier(&self) -> Carrier;

    /// Translate a vendor status code; unmapped codes become `Unknown`.
    fn map_status(&self, raw: &str) -> PackageStatus;

    fn build_request(
        &self,
        tracking_number: &str,
        credentials: &Credentials,
    ) -> TrackingResult<HttpRequest>;

    /// `Ok(None)` when the carrier reports no matching shipment.
    fn parse_response(&self, body: &str) -> TrackingResult<Option<TrackingSnapshot>>;

    /// Non-2xx statuses the carrier uses to say "no such shipment".
    fn is_missing_shipment(&self, _status: u16) -> bool {
        false
    }

    /// Request used to check that a credential is accepted.
    fn probe_request(&self, credentials: &Credentials) -> TrackingResult<HttpRequest> {
        self.build_request(PROBE_TRACKING_NUMBER, credentials)
    }
}

static UPS: Ups = Ups;
static FEDEX: Fedex = Fedex;
static USPS: Usps = Usps;
static DHL: Dhl = Dhl;

pub fn provider_for(carrier: Carrier) -> &'static dyn TrackingProvider {
    match carrier {
        Carrier::Ups => &UPS,
        Carrier::Fedex => &FEDEX,
        Carrier::Usps => &USPS,
        Carrier::Dhl => &DHL,
    }
}

/// Pure status mapping for any carrier.
pub fn map_status(carrier: Carrier, raw: &str) -> PackageStatus {
    provider_for(carrier).map_status(raw)
}

/// Look up one tracking number.
///
/// Transport failures and retryable HTTP statuses are retried up to
/// `retry.max_attempts` total tries; payload errors are not.
pub async fn fetch_tracking<H, C>(
    provider: &dyn TrackingProvider,
    tracking_number: &str,
    credentials: &Credentials,
    http: &H,
    clock: &C,
    retry: &RetryPolicy,
) -> TrackingResult<Option<TrackingSnapshot>>
where
    H: HttpClient,
    C: Clock,
{
    let carrier = provider.carrier();
    let request = provider.build_request(tracking_number, credentials)?;

    let mut attempt = 0u32;
    let response = loop {
        attempt += 1;
        match send_once(provider, &request, http).await {
            Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                warn!(
                    %carrier,
                    tracking_number,
                    attempt,
                    wait_ms = retry.delay.as_millis() as u64,
                    error = %err,
                    "carrier call failed, retrying"
                );
                clock.sleep(retry.delay).await;
            }
            other => break other?,
        }
    };

    match response {
        None => {
            debug!(%carrier, tracking_number, "carrier reports no matching shipment");
            Ok(None)
        }
        Some(resp) => provider.parse_response(&resp.body),
    }
}

/// One HTTP exchange. `Ok(None)` for a "missing shipment" status.
async fn send_once<H: HttpClient>(
    provider: &dyn TrackingProvider,
    request: &HttpRequest,
    http: &H,
) -> TrackingResult<Option<HttpResponse>> {
    let carrier = provider.carrier();
    let response = http
        .send(request)
        .await
        .map_err(|e| TrackingError::carrier_api(carrier, None, e.to_string()))?;

    if provider.is_missing_shipment(response.status) {
        return Ok(None);
    }
    if !response.is_success() {
        return Err(TrackingError::carrier_api(
            carrier,
            Some(response.status),
            snippet(&response.body),
        ));
    }
    Ok(Some(response))
}

fn required<'a>(
    carrier: Carrier,
    value: &'a Option<String>,
    field: &'static str,
) -> TrackingResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(TrackingError::MissingCredential { carrier, field })
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(ERROR_BODY_SNIPPET) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// Join the non-empty parts of an address with ", ".
fn join_location(parts: &[Option<&str>]) -> Option<String> {
    let joined = parts
        .iter()
        .flatten()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `YYYYMMDD` → `YYYY-MM-DD`; anything else is passed through.
fn expand_compact_date(date: &str) -> String {
    let date = date.trim();
    if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}-{}", &date[..4], &date[4..6], &date[6..])
    } else {
        date.to_string()
    }
}

/// `YYYYMMDD` + `HHMMSS` → `YYYY-MM-DDTHH:MM:SS`.
fn expand_compact_datetime(date: &str, time: Option<&str>) -> String {
    let date = expand_compact_date(date);
    match time.map(str::trim) {
        Some(t) if t.len() == 6 && t.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{date}T{}:{}:{}", &t[..2], &t[2..4], &t[4..])
        }
        _ => date,
    }
}
