use serde::{Deserialize, Serialize};
use std::fmt;

// ── Carrier ─────────────────────────────────────────────────────

/// Shipping companies whose tracking APIs are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Carrier {
    Ups,
    Fedex,
    Usps,
    Dhl,
}

impl Carrier {
    pub const ALL: [Carrier; 4] = [Carrier::Ups, Carrier::Fedex, Carrier::Usps, Carrier::Dhl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ups => "ups",
            Self::Fedex => "fedex",
            Self::Usps => "usps",
            Self::Dhl => "dhl",
        }
    }

    /// Case-insensitive lookup from a `service_name` / `carrier` column.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Internal status ─────────────────────────────────────────────

/// Carrier-independent package status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pickup,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Exception,
    Unknown,
}

/// Statuses the reconciliation loop polls carriers for.
pub const POLLED_STATUSES: [PackageStatus; 3] = [
    PackageStatus::Shipped,
    PackageStatus::InTransit,
    PackageStatus::OutForDelivery,
];

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Shipped => "shipped",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Exception => "exception",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse of a stored status column; legacy values become `Unknown`.
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pickup" => Self::Pickup,
            "shipped" => Self::Shipped,
            "in_transit" => Self::InTransit,
            "out_for_delivery" => Self::OutForDelivery,
            "delivered" => Self::Delivered,
            "exception" => Self::Exception,
            _ => Self::Unknown,
        }
    }

    /// Position on the delivery path. `None` for off-path states.
    fn stage(&self) -> Option<u8> {
        match self {
            Self::Pickup | Self::Shipped => Some(1),
            Self::InTransit => Some(2),
            Self::OutForDelivery => Some(3),
            Self::Delivered => Some(4),
            Self::Exception | Self::Unknown => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Whether a carrier-reported `next` may replace `self`.
    ///
    /// Movement is strictly forward along the delivery path, with `exception`
    /// reachable from any non-terminal state. Moves within one stage
    /// (`shipped` to `pickup`) are refused. `delivered` is never left and
    /// `unknown` never overwrites a stored status. Identical statuses are not
    /// a transition.
    pub fn can_transition_to(&self, next: PackageStatus) -> bool {
        if *self == next || self.is_terminal() || next == Self::Unknown {
            return false;
        }
        match (self.stage(), next.stage()) {
            (_, None) => true,
            (None, Some(_)) => true,
            (Some(current), Some(proposed)) => proposed > current,
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Package ─────────────────────────────────────────────────────

/// One normalized carrier scan / activity record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackingEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A tracked package as the reconciliation loop sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: String,
    pub tracking_number: String,
    pub carrier: Carrier,
    pub status: PackageStatus,
    pub customer_id: Option<String>,
    pub last_tracking_update: Option<String>,
    #[serde(default)]
    pub tracking_history: Vec<TrackingEvent>,
    pub estimated_delivery: Option<String>,
}

/// Normalized result of one carrier lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub status: PackageStatus,
    pub raw_status: String,
    pub events: Vec<TrackingEvent>,
    pub estimated_delivery: Option<String>,
    pub location: Option<String>,
}

/// Conditional write of new tracking state for one package.
///
/// Applied only while the row's `last_tracking_update` still equals
/// `expected_last_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageUpdate {
    pub package_id: String,
    pub status: PackageStatus,
    pub tracking_history: Vec<TrackingEvent>,
    pub estimated_delivery: Option<String>,
    pub updated_at: String,
    pub expected_last_update: Option<String>,
}

/// Manual status change requested by staff.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusOverride {
    pub status: PackageStatus,
    pub note: Option<String>,
    #[serde(default = "default_true")]
    pub notify: bool,
}

fn default_true() -> bool {
    true
}
