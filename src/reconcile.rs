//! Reconciliation of stored package state against carrier tracking.
//!
//! A run is a stateless batch: select due packages, look each one up with
//! its carrier, write forward transitions conditionally, and queue customer
//! notifications for actionable changes. One package failing never stops
//! the rest; failures come back as [`BatchError`] entries.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::carriers::{fetch_tracking, provider_for};
use crate::clock::{to_iso, Clock};
use crate::config::SyncConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::http::HttpClient;
use crate::models::{
    BatchError, Carrier, CarrierSyncResult, ConnectionTestResponse, Integration,
    IntegrationLog, IntegrationRequestType, Package, PackageStatus, PackageUpdate,
    StatusOverride, StatusOverrideResponse, SyncResponse, TrackingEvent, CARRIER_SERVICE_TYPE,
};
use crate::notify::{notify_status_change, should_notify};
use crate::store::PackageStore;

const NO_INTEGRATIONS: &str = "No active carrier integrations found";
const NO_PACKAGES: &str = "No packages need tracking updates";
const SYNC_LOG_ENDPOINT: &str = "tracking";
const MANUAL_EVENT_CODE: &str = "manual";

/// What happened to one package during a run.
#[derive(Debug)]
pub enum PackageOutcome {
    /// New status written.
    Updated {
        previous: PackageStatus,
        status: PackageStatus,
        notification: NotificationOutcome,
    },
    /// Carrier agrees with the stored status.
    Unchanged,
    /// Carrier reported a status the package may not move to.
    Rejected(PackageStatus),
    /// Carrier has no matching shipment.
    NotFound,
    /// Another writer refreshed the row first.
    Conflict,
}

#[derive(Debug)]
pub enum NotificationOutcome {
    NotRequired,
    Queued,
    /// Customer has no reachable contact.
    Skipped,
    Failed(TrackingError),
}

pub struct Reconciler<S, H, C> {
    store: S,
    http: H,
    clock: C,
    config: SyncConfig,
}

impl<S, H, C> Reconciler<S, H, C>
where
    S: PackageStore,
    H: HttpClient,
    C: Clock,
{
    pub fn new(store: S, http: H, clock: C, config: SyncConfig) -> Self {
        Self {
            store,
            http,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    // ── Batch entry points ──────────────────────────────────

    /// Refresh every due package across all active carrier integrations.
    ///
    /// Errors only when the integrations or the due set cannot be loaded.
    pub async fn reconcile_due_batch(&self) -> TrackingResult<SyncResponse> {
        let integrations = self.store.active_carrier_integrations().await?;
        let selected = select_integrations(integrations);
        if selected.is_empty() {
            info!("no active carrier integrations");
            return Ok(SyncResponse::idle(NO_INTEGRATIONS));
        }

        let carriers: Vec<Carrier> = selected.iter().map(|(c, _)| *c).collect();
        let due = self
            .store
            .due_packages(&carriers, &self.stale_before(), self.config.batch_limit)
            .await?;
        if due.is_empty() {
            info!(carriers = carriers.len(), "no packages due for tracking");
            return Ok(SyncResponse::idle(NO_PACKAGES));
        }
        info!(
            packages = due.len(),
            carriers = carriers.len(),
            "reconciling due packages"
        );

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (carrier, integration) in &selected {
            let group: Vec<&Package> = due.iter().filter(|p| p.carrier == *carrier).collect();
            if group.is_empty() {
                continue;
            }
            let (result, carrier_errors) = self.sync_carrier(*carrier, integration, &group).await;
            results.push(result);
            errors.extend(carrier_errors);
        }

        Ok(summarize(results, errors))
    }

    /// Refresh due packages for the carrier owned by one integration and
    /// record the outcome on the integration row.
    pub async fn sync_integration(&self, integration_id: &str) -> TrackingResult<SyncResponse> {
        let integration = self.load_integration(integration_id).await?;
        let carrier = integration
            .carrier()
            .ok_or_else(|| TrackingError::UnsupportedCarrier(integration.service_name.clone()))?;
        if !integration.is_active {
            return Err(TrackingError::InvalidRequest(format!(
                "integration {integration_id} is not active"
            )));
        }

        let due = self
            .store
            .due_packages(&[carrier], &self.stale_before(), self.config.batch_limit)
            .await?;

        let response = if due.is_empty() {
            SyncResponse::idle(NO_PACKAGES)
        } else {
            let group: Vec<&Package> = due.iter().collect();
            let (result, errors) = self.sync_carrier(carrier, &integration, &group).await;
            summarize(vec![result], errors)
        };

        let last_error = (!response.errors.is_empty()).then(|| join_messages(&response.errors));
        self.store
            .record_integration_sync(integration_id, &self.clock.now_iso(), last_error.as_deref())
            .await?;
        Ok(response)
    }

    /// Check that an integration's stored credential is accepted by its carrier.
    pub async fn test_connection(
        &self,
        integration_id: &str,
    ) -> TrackingResult<ConnectionTestResponse> {
        let integration = self.load_integration(integration_id).await?;
        let started = self.clock.now();

        let (endpoint, outcome) = match integration.carrier() {
            Some(carrier) => self.probe(carrier, &integration).await,
            None if !integration
                .service_type
                .eq_ignore_ascii_case(CARRIER_SERVICE_TYPE) =>
            {
                (None, Err(format!(
                    "Unsupported integration type: {}",
                    integration.service_type
                )))
            }
            None => (None, Err("Unknown carrier service".to_string())),
        };

        let finished = self.clock.now();
        let elapsed = (finished - started).num_milliseconds();
        let checked_at = to_iso(finished);
        let (success, message) = match outcome {
            Ok(message) => (true, message),
            Err(message) => (false, message),
        };
        let response = ConnectionTestResponse {
            success,
            message,
            response_time_ms: elapsed,
        };
        let last_error = (!success).then_some(response.message.as_str());

        self.store
            .record_connection_test(integration_id, success, last_error, &checked_at)
            .await?;

        let log = IntegrationLog {
            integration_id: Some(integration_id.to_string()),
            request_type: IntegrationRequestType::Test,
            endpoint,
            status_code: if success { 200 } else { 400 },
            response_data: serde_json::to_value(&response).unwrap_or_default(),
            execution_time_ms: elapsed,
            error_message: last_error.map(str::to_string),
            created_at: checked_at,
        };
        if let Err(err) = self.store.record_integration_log(&log).await {
            warn!(integration_id, error = %err, "failed to record connection test log");
        }

        info!(integration_id, success, elapsed_ms = elapsed, "connection test finished");
        Ok(response)
    }

    /// Staff correction of a package status. Unlike carrier updates this may
    /// move backwards; it still never sets `unknown`.
    pub async fn override_status(
        &self,
        package_id: &str,
        request: StatusOverride,
    ) -> TrackingResult<StatusOverrideResponse> {
        if request.status == PackageStatus::Unknown {
            return Err(TrackingError::InvalidRequest(
                "status cannot be set to unknown".into(),
            ));
        }
        let package = self
            .store
            .package_by_id(package_id)
            .await?
            .ok_or_else(|| TrackingError::NotFound(format!("package {package_id}")))?;

        let previous = package.status;
        if previous == request.status {
            return Ok(StatusOverrideResponse {
                package_id: package.id,
                previous_status: previous,
                status: previous,
                notification_queued: false,
            });
        }

        let now = self.clock.now_iso();
        let mut history = package.tracking_history.clone();
        history.insert(
            0,
            TrackingEvent {
                timestamp: Some(now.clone()),
                description: Some(
                    request
                        .note
                        .clone()
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("Status set to {} by staff", request.status)),
                ),
                location: None,
                code: Some(MANUAL_EVENT_CODE.into()),
            },
        );

        let update = PackageUpdate {
            package_id: package.id.clone(),
            status: request.status,
            tracking_history: history,
            estimated_delivery: None,
            updated_at: now,
            expected_last_update: package.last_tracking_update.clone(),
        };
        if !self.store.update_tracking(&update).await? {
            return Err(TrackingError::Conflict(format!(
                "package {package_id} changed while it was being updated"
            )));
        }
        info!(package_id, %previous, status = %request.status, "package status overridden");

        let notification_queued = if request.notify && should_notify(previous, request.status) {
            let queued =
                notify_status_change(&self.store, &package, request.status, &update.updated_at)
                    .await;
            match queued {
                Ok(queued) => queued,
                Err(err) => {
                    warn!(package_id, error = %err, "failed to queue override notification");
                    false
                }
            }
        } else {
            false
        };

        Ok(StatusOverrideResponse {
            package_id: package.id,
            previous_status: previous,
            status: request.status,
            notification_queued,
        })
    }

    // ── Per-carrier and per-package work ────────────────────

    async fn sync_carrier(
        &self,
        carrier: Carrier,
        integration: &Integration,
        packages: &[&Package],
    ) -> (CarrierSyncResult, Vec<BatchError>) {
        let started = self.clock.now();
        let mut errors = Vec::new();
        let mut updated = 0;
        let mut notified = 0;

        for package in packages {
            match self.reconcile_package(integration, package).await {
                Ok(PackageOutcome::Updated { notification, .. }) => {
                    updated += 1;
                    match notification {
                        NotificationOutcome::Queued => notified += 1,
                        NotificationOutcome::Failed(err) => {
                            warn!(
                                tracking_number = %package.tracking_number,
                                error = %err,
                                "failed to queue notification"
                            );
                            errors.push(BatchError::for_package(
                                &package.tracking_number,
                                carrier,
                                &err,
                            ));
                        }
                        NotificationOutcome::NotRequired | NotificationOutcome::Skipped => {}
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        %carrier,
                        tracking_number = %package.tracking_number,
                        kind = err.kind(),
                        error = %err,
                        "package reconciliation failed"
                    );
                    errors.push(BatchError::for_package(&package.tracking_number, carrier, &err));
                }
            }
        }

        let finished = self.clock.now();
        let result = CarrierSyncResult {
            carrier,
            integration_id: integration.id.clone(),
            packages_processed: packages.len(),
            packages_updated: updated,
            notifications_queued: notified,
            errors: errors.len(),
            execution_time_ms: (finished - started).num_milliseconds(),
        };

        let log = IntegrationLog {
            integration_id: Some(integration.id.clone()),
            request_type: IntegrationRequestType::Sync,
            endpoint: Some(SYNC_LOG_ENDPOINT.into()),
            status_code: if errors.is_empty() { 200 } else { 500 },
            response_data: serde_json::to_value(&result).unwrap_or_default(),
            execution_time_ms: result.execution_time_ms,
            error_message: (!errors.is_empty()).then(|| join_messages(&errors)),
            created_at: to_iso(finished),
        };
        if let Err(err) = self.store.record_integration_log(&log).await {
            warn!(%carrier, error = %err, "failed to record integration log");
            errors.push(BatchError::for_carrier(Some(carrier), &err));
        }

        info!(
            %carrier,
            processed = result.packages_processed,
            updated = result.packages_updated,
            errors = result.errors,
            elapsed_ms = result.execution_time_ms,
            "carrier sync finished"
        );
        (result, errors)
    }

    /// Look one package up and apply whatever the carrier reports.
    pub async fn reconcile_package(
        &self,
        integration: &Integration,
        package: &Package,
    ) -> TrackingResult<PackageOutcome> {
        let snapshot = fetch_tracking(
            provider_for(package.carrier),
            &package.tracking_number,
            &integration.credentials,
            &self.http,
            &self.clock,
            &self.config.retry,
        )
        .await?;

        let Some(snapshot) = snapshot else {
            self.touch(package).await?;
            return Ok(PackageOutcome::NotFound);
        };

        if snapshot.status == package.status {
            self.touch(package).await?;
            return Ok(PackageOutcome::Unchanged);
        }
        if !package.status.can_transition_to(snapshot.status) {
            debug!(
                tracking_number = %package.tracking_number,
                current = %package.status,
                reported = %snapshot.status,
                raw_status = %snapshot.raw_status,
                "ignoring carrier status that would move the package backwards"
            );
            self.touch(package).await?;
            return Ok(PackageOutcome::Rejected(snapshot.status));
        }

        let update = PackageUpdate {
            package_id: package.id.clone(),
            status: snapshot.status,
            tracking_history: merge_history(snapshot.events, &package.tracking_history),
            estimated_delivery: snapshot.estimated_delivery,
            updated_at: self.clock.now_iso(),
            expected_last_update: package.last_tracking_update.clone(),
        };
        if !self.store.update_tracking(&update).await? {
            info!(
                tracking_number = %package.tracking_number,
                "package refreshed by another run, skipping"
            );
            return Ok(PackageOutcome::Conflict);
        }
        info!(
            tracking_number = %package.tracking_number,
            from = %package.status,
            to = %snapshot.status,
            "package status updated"
        );

        let notification = if should_notify(package.status, snapshot.status) {
            match notify_status_change(&self.store, package, snapshot.status, &update.updated_at)
                .await
            {
                Ok(true) => NotificationOutcome::Queued,
                Ok(false) => NotificationOutcome::Skipped,
                Err(err) => NotificationOutcome::Failed(err),
            }
        } else {
            NotificationOutcome::NotRequired
        };

        Ok(PackageOutcome::Updated {
            previous: package.status,
            status: snapshot.status,
            notification,
        })
    }

    // ── Helpers ─────────────────────────────────────────────

    async fn probe(
        &self,
        carrier: Carrier,
        integration: &Integration,
    ) -> (Option<String>, Result<String, String>) {
        let request = match provider_for(carrier).probe_request(&integration.credentials) {
            Ok(request) => request,
            Err(err) => return (None, Err(err.to_string())),
        };
        let endpoint = Some(request.url.clone());
        let outcome = match self.http.send(&request).await {
            Err(err) => Err(format!("{carrier} connection failed: {err}")),
            Ok(resp) if matches!(resp.status, 401 | 403) => {
                Err(format!("{carrier} rejected the credentials ({})", resp.status))
            }
            Ok(resp) if resp.status >= 500 => {
                Err(format!("{carrier} API unavailable ({})", resp.status))
            }
            Ok(_) => Ok(format!("{carrier} connection successful")),
        };
        (endpoint, outcome)
    }

    async fn load_integration(&self, id: &str) -> TrackingResult<Integration> {
        self.store
            .integration_by_id(id)
            .await?
            .ok_or_else(|| TrackingError::NotFound(format!("integration {id}")))
    }

    async fn touch(&self, package: &Package) -> TrackingResult<()> {
        let touched = self
            .store
            .touch_tracking(
                &package.id,
                package.last_tracking_update.as_deref(),
                &self.clock.now_iso(),
            )
            .await?;
        if !touched {
            debug!(tracking_number = %package.tracking_number, "refresh marker already moved");
        }
        Ok(())
    }

    fn stale_before(&self) -> String {
        to_iso(self.clock.now() - self.config.stale_after)
    }
}

/// One integration per carrier, first one wins. Non-carrier and unknown
/// service names are skipped.
fn select_integrations(integrations: Vec<Integration>) -> Vec<(Carrier, Integration)> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for integration in integrations {
        let Some(carrier) = integration.carrier() else {
            warn!(
                integration_id = %integration.id,
                service_name = %integration.service_name,
                "skipping integration for unsupported carrier"
            );
            continue;
        };
        if !seen.insert(carrier) {
            warn!(
                integration_id = %integration.id,
                %carrier,
                "duplicate active integration for carrier, ignoring"
            );
            continue;
        }
        selected.push((carrier, integration));
    }
    selected
}

/// Carrier events replace the stored history, except staff entries, which
/// are kept. Newest first; events without a timestamp sort last.
fn merge_history(
    carrier_events: Vec<TrackingEvent>,
    stored: &[TrackingEvent],
) -> Vec<TrackingEvent> {
    let mut history = carrier_events;
    history.extend(
        stored
            .iter()
            .filter(|e| e.code.as_deref() == Some(MANUAL_EVENT_CODE))
            .cloned(),
    );
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    history
}

fn summarize(results: Vec<CarrierSyncResult>, errors: Vec<BatchError>) -> SyncResponse {
    let updated: usize = results.iter().map(|r| r.packages_updated).sum();
    SyncResponse {
        success: errors.is_empty(),
        message: format!("Updated {updated} packages"),
        packages_updated: updated,
        results,
        errors,
    }
}

fn join_messages(errors: &[BatchError]) -> String {
    errors
        .iter()
        .map(|e| match &e.tracking_number {
            Some(n) => format!("{n}: {}", e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
