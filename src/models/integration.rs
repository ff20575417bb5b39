use serde::{Deserialize, Serialize};

use super::Carrier;

/// `integrations.service_type` value for shipping carriers.
pub const CARRIER_SERVICE_TYPE: &str = "carrier";

/// A configured third-party integration owned by the operating business.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Integration {
    pub id: String,
    pub service_type: String,
    pub service_name: String,
    #[serde(default)]
    pub credentials: Credentials,
    pub is_active: bool,
    pub is_connected: bool,
    pub last_sync_at: Option<String>,
    pub last_error: Option<String>,
}

impl Integration {
    /// The carrier this integration speaks for, if it is a known carrier.
    pub fn carrier(&self) -> Option<Carrier> {
        if !self.service_type.eq_ignore_ascii_case(CARRIER_SERVICE_TYPE) {
            return None;
        }
        Carrier::parse(&self.service_name)
    }
}

/// Per-carrier secret bundle. Only the field the carrier needs is required.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// OAuth bearer token (UPS, FedEx).
    pub access_token: Option<String>,
    /// Web Tools user id (USPS).
    pub user_id: Option<String>,
    /// API key (DHL).
    pub api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("user_id", &redact(&self.user_id))
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationRequestType {
    Sync,
    Test,
}

/// Audit row written to `integration_logs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationLog {
    pub integration_id: Option<String>,
    pub request_type: IntegrationRequestType,
    pub endpoint: Option<String>,
    pub status_code: u16,
    pub response_data: serde_json::Value,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
    pub created_at: String,
}
