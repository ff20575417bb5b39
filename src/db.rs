use tracing::warn;
use wasm_bindgen::JsValue;
use worker::{D1Database, D1Result};

use crate::error::{TrackingError, TrackingResult};
use crate::models::{
    Carrier, Credentials, CustomerContact, Integration, IntegrationLog, Notification, Package,
    PackageStatus, PackageUpdate, TrackingEvent, CARRIER_SERVICE_TYPE, POLLED_STATUSES,
};
use crate::store::PackageStore;

/// [`PackageStore`] over the D1 binding.
pub struct D1Store {
    db: D1Database,
}

impl D1Store {
    pub fn new(db: D1Database) -> Self {
        Self { db }
    }
}

fn opt_str(s: Option<&str>) -> JsValue {
    match s {
        Some(s) => JsValue::from_str(s),
        None => JsValue::NULL,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> TrackingResult<String> {
    serde_json::to_string(value).map_err(TrackingError::persistence)
}

fn changed(result: &D1Result) -> TrackingResult<bool> {
    Ok(result
        .meta()?
        .map(|m| m.changes.unwrap_or(0) > 0)
        .unwrap_or(false))
}

fn random_hex_id() -> TrackingResult<String> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf)
        .map_err(|err| TrackingError::Persistence(format!("failed to generate id: {err}")))?;
    Ok(hex::encode(buf))
}

/// `?1, ?2, …` starting at `first`.
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

const PACKAGE_COLUMNS: &str = "id, tracking_number, carrier, status, customer_id, \
     last_tracking_update, tracking_history, estimated_delivery";

impl PackageStore for D1Store {
    async fn active_carrier_integrations(&self) -> TrackingResult<Vec<Integration>> {
        let result: D1Result = self
            .db
            .prepare(
                "SELECT * FROM integrations
                 WHERE service_type = ?1 AND is_active = 1 AND is_connected = 1
                 ORDER BY created_at ASC",
            )
            .bind(&[JsValue::from_str(CARRIER_SERVICE_TYPE)])?
            .all()
            .await?;

        let rows: Vec<IntegrationRow> = result.results()?;
        Ok(rows.into_iter().map(IntegrationRow::into_integration).collect())
    }

    async fn integration_by_id(&self, id: &str) -> TrackingResult<Option<Integration>> {
        let row: Option<IntegrationRow> = self
            .db
            .prepare("SELECT * FROM integrations WHERE id = ?1")
            .bind(&[JsValue::from_str(id)])?
            .first(None)
            .await?;
        Ok(row.map(IntegrationRow::into_integration))
    }

    async fn due_packages(
        &self,
        carriers: &[Carrier],
        stale_before: &str,
        limit: u32,
    ) -> TrackingResult<Vec<Package>> {
        if carriers.is_empty() {
            return Ok(Vec::new());
        }

        // Bindings: statuses, carriers, cutoff, limit.
        let status_slots = placeholders(1, POLLED_STATUSES.len());
        let carrier_slots = placeholders(1 + POLLED_STATUSES.len(), carriers.len());
        let cutoff = 1 + POLLED_STATUSES.len() + carriers.len();
        let query = format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages
             WHERE status IN ({status_slots})
               AND lower(carrier) IN ({carrier_slots})
               AND tracking_number IS NOT NULL AND trim(tracking_number) <> ''
               AND (last_tracking_update IS NULL OR last_tracking_update < ?{cutoff})
             ORDER BY last_tracking_update IS NOT NULL, last_tracking_update ASC
             LIMIT ?{}",
            cutoff + 1
        );

        let mut bindings: Vec<JsValue> = POLLED_STATUSES
            .iter()
            .map(|s| JsValue::from_str(s.as_str()))
            .collect();
        bindings.extend(carriers.iter().map(|c| JsValue::from_str(c.as_str())));
        bindings.push(JsValue::from_str(stale_before));
        bindings.push(JsValue::from(limit));

        let result: D1Result = self.db.prepare(&query).bind(&bindings)?.all().await?;
        let rows: Vec<PackageRow> = result.results()?;
        Ok(rows.into_iter().filter_map(PackageRow::into_package).collect())
    }

    async fn package_by_id(&self, id: &str) -> TrackingResult<Option<Package>> {
        let row: Option<PackageRow> = self
            .db
            .prepare(format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1"))
            .bind(&[JsValue::from_str(id)])?
            .first(None)
            .await?;
        Ok(row.and_then(PackageRow::into_package))
    }

    async fn update_tracking(&self, update: &PackageUpdate) -> TrackingResult<bool> {
        let history = to_json(&update.tracking_history)?;
        let result: D1Result = self
            .db
            .prepare(
                "UPDATE packages
                 SET status = ?1, tracking_history = ?2,
                     estimated_delivery = COALESCE(?3, estimated_delivery),
                     last_tracking_update = ?4, updated_at = ?4
                 WHERE id = ?5 AND last_tracking_update IS ?6",
            )
            .bind(&[
                JsValue::from_str(update.status.as_str()),
                JsValue::from_str(&history),
                opt_str(update.estimated_delivery.as_deref()),
                JsValue::from_str(&update.updated_at),
                JsValue::from_str(&update.package_id),
                opt_str(update.expected_last_update.as_deref()),
            ])?
            .run()
            .await?;
        changed(&result)
    }

    async fn touch_tracking(
        &self,
        package_id: &str,
        expected_last_update: Option<&str>,
        now: &str,
    ) -> TrackingResult<bool> {
        let result: D1Result = self
            .db
            .prepare(
                "UPDATE packages SET last_tracking_update = ?1
                 WHERE id = ?2 AND last_tracking_update IS ?3",
            )
            .bind(&[
                JsValue::from_str(now),
                JsValue::from_str(package_id),
                opt_str(expected_last_update),
            ])?
            .run()
            .await?;
        changed(&result)
    }

    async fn customer_contact(&self, customer_id: &str) -> TrackingResult<Option<CustomerContact>> {
        let contact: Option<CustomerContact> = self
            .db
            .prepare("SELECT id, first_name, email, phone FROM customers WHERE id = ?1")
            .bind(&[JsValue::from_str(customer_id)])?
            .first(None)
            .await?;
        Ok(contact)
    }

    async fn enqueue_notification(&self, notification: &Notification) -> TrackingResult<String> {
        let id = random_hex_id()?;
        let metadata = notification.metadata.as_ref().map(to_json).transpose()?;

        self.db
            .prepare(
                "INSERT INTO notification_queue
                   (id, customer_id, channel, recipient, subject, content, status, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&[
                JsValue::from_str(&id),
                JsValue::from_str(&notification.customer_id),
                JsValue::from_str(notification.channel.as_str()),
                JsValue::from_str(&notification.recipient),
                JsValue::from_str(&notification.subject),
                JsValue::from_str(&notification.content),
                JsValue::from_str(notification.status.as_str()),
                opt_str(metadata.as_deref()),
                JsValue::from_str(&notification.created_at),
            ])?
            .run()
            .await?;

        Ok(id)
    }

    async fn record_integration_log(&self, log: &IntegrationLog) -> TrackingResult<()> {
        let id = random_hex_id()?;
        let request_type = match log.request_type {
            crate::models::IntegrationRequestType::Sync => "sync",
            crate::models::IntegrationRequestType::Test => "test",
        };

        self.db
            .prepare(
                "INSERT INTO integration_logs
                   (id, integration_id, request_type, endpoint, status_code, response_data,
                    execution_time_ms, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&[
                JsValue::from_str(&id),
                opt_str(log.integration_id.as_deref()),
                JsValue::from_str(request_type),
                opt_str(log.endpoint.as_deref()),
                JsValue::from(log.status_code),
                JsValue::from_str(&to_json(&log.response_data)?),
                JsValue::from_f64(log.execution_time_ms as f64),
                opt_str(log.error_message.as_deref()),
                JsValue::from_str(&log.created_at),
            ])?
            .run()
            .await?;

        Ok(())
    }

    async fn record_integration_sync(
        &self,
        integration_id: &str,
        synced_at: &str,
        last_error: Option<&str>,
    ) -> TrackingResult<()> {
        self.db
            .prepare(
                "UPDATE integrations SET last_sync_at = ?1, last_error = ?2, updated_at = ?1
                 WHERE id = ?3",
            )
            .bind(&[
                JsValue::from_str(synced_at),
                opt_str(last_error),
                JsValue::from_str(integration_id),
            ])?
            .run()
            .await?;
        Ok(())
    }

    async fn record_connection_test(
        &self,
        integration_id: &str,
        connected: bool,
        last_error: Option<&str>,
        checked_at: &str,
    ) -> TrackingResult<()> {
        self.db
            .prepare(
                "UPDATE integrations SET is_connected = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
            )
            .bind(&[
                JsValue::from(i32::from(connected)),
                opt_str(last_error),
                JsValue::from_str(checked_at),
                JsValue::from_str(integration_id),
            ])?
            .run()
            .await?;
        Ok(())
    }
}

// ── Row types ───────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct PackageRow {
    id: String,
    tracking_number: Option<String>,
    carrier: Option<String>,
    status: String,
    customer_id: Option<String>,
    last_tracking_update: Option<String>,
    tracking_history: Option<String>,
    estimated_delivery: Option<String>,
}

impl PackageRow {
    /// `None` for rows this worker cannot track (no tracking number or an
    /// unknown carrier).
    fn into_package(self) -> Option<Package> {
        let tracking_number = self.tracking_number.filter(|t| !t.trim().is_empty())?;
        let Some(carrier) = self.carrier.as_deref().and_then(Carrier::parse) else {
            warn!(package_id = %self.id, carrier = ?self.carrier, "skipping package with unknown carrier");
            return None;
        };
        let tracking_history = match self.tracking_history.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<TrackingEvent>>(raw).unwrap_or_else(|err| {
                warn!(package_id = %self.id, error = %err, "unreadable tracking_history, starting fresh");
                Vec::new()
            }),
        };

        Some(Package {
            id: self.id,
            tracking_number,
            carrier,
            status: PackageStatus::from_db(&self.status),
            customer_id: self.customer_id,
            last_tracking_update: self.last_tracking_update,
            tracking_history,
            estimated_delivery: self.estimated_delivery,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct IntegrationRow {
    id: String,
    service_type: String,
    service_name: String,
    credentials: Option<String>,
    is_active: i32,
    is_connected: i32,
    last_sync_at: Option<String>,
    last_error: Option<String>,
}

impl IntegrationRow {
    fn into_integration(self) -> Integration {
        let credentials = match self.credentials.as_deref() {
            None | Some("") => Credentials::default(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
                warn!(integration_id = %self.id, error = %err, "unreadable credentials");
                Credentials::default()
            }),
        };

        Integration {
            id: self.id,
            service_type: self.service_type,
            service_name: self.service_name,
            credentials,
            is_active: self.is_active != 0,
            is_connected: self.is_connected != 0,
            last_sync_at: self.last_sync_at,
            last_error: self.last_error,
        }
    }
}
