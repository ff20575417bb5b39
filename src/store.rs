//! Data-access seam for the reconciliation loop.
//!
//! [`crate::db::D1Store`] is the production implementation; tests drive the
//! loop through an in-memory fake.

use crate::error::TrackingResult;
use crate::models::{
    Carrier, CustomerContact, Integration, IntegrationLog, Notification, Package, PackageUpdate,
};

#[allow(async_fn_in_trait)]
pub trait PackageStore {
    /// Active, connected integrations with `service_type = 'carrier'`,
    /// oldest first.
    async fn active_carrier_integrations(&self) -> TrackingResult<Vec<Integration>>;

    async fn integration_by_id(&self, id: &str) -> TrackingResult<Option<Integration>>;

    /// Packages of `carriers` in a polled status with a tracking number whose
    /// last refresh is before `stale_before` (or that were never refreshed),
    /// least recently refreshed first.
    async fn due_packages(
        &self,
        carriers: &[Carrier],
        stale_before: &str,
        limit: u32,
    ) -> TrackingResult<Vec<Package>>;

    async fn package_by_id(&self, id: &str) -> TrackingResult<Option<Package>>;

    /// Write new tracking state if the row still carries
    /// `update.expected_last_update`. Returns whether a row changed.
    async fn update_tracking(&self, update: &PackageUpdate) -> TrackingResult<bool>;

    /// Refresh `last_tracking_update` only, under the same condition.
    async fn touch_tracking(
        &self,
        package_id: &str,
        expected_last_update: Option<&str>,
        now: &str,
    ) -> TrackingResult<bool>;

    async fn customer_contact(&self, customer_id: &str) -> TrackingResult<Option<CustomerContact>>;

    /// Insert a `notification_queue` row stamped with its `created_at`;
    /// returns its id.
    async fn enqueue_notification(&self, notification: &Notification) -> TrackingResult<String>;

    async fn record_integration_log(&self, log: &IntegrationLog) -> TrackingResult<()>;

    async fn record_integration_sync(
        &self,
        integration_id: &str,
        synced_at: &str,
        last_error: Option<&str>,
    ) -> TrackingResult<()>;

    async fn record_connection_test(
        &self,
        integration_id: &str,
        connected: bool,
        last_error: Option<&str>,
        checked_at: &str,
    ) -> TrackingResult<()>;
}
