//! In-memory collaborators for driving carriers and the reconciliation loop
//! in native tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{TrackingError, TrackingResult, TransportError};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::models::{
    Carrier, CustomerContact, Integration, IntegrationLog, Notification, Package, PackageStatus,
    PackageUpdate, POLLED_STATUSES,
};
use crate::store::PackageStore;

// ── HTTP ────────────────────────────────────────────────────────

type Scripted = Result<HttpResponse, TransportError>;

/// Scripted carrier endpoints keyed by a substring of the URL or body.
///
/// Each key replays its responses in order and then repeats the last one.
#[derive(Default)]
pub struct FakeHttp {
    routes: RefCell<Vec<(String, VecDeque<Scripted>)>>,
    calls: RefCell<HashMap<String, usize>>,
    total: Cell<usize>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &str, status: u16, body: &str) {
        self.push(
            key,
            Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&self, key: &str, err: TransportError) {
        self.push(key, Err(err));
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.borrow().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.get()
    }

    fn push(&self, key: &str, scripted: Scripted) {
        let mut routes = self.routes.borrow_mut();
        match routes.iter_mut().find(|(k, _)| k == key) {
            Some((_, queue)) => queue.push_back(scripted),
            None => routes.push((key.to_string(), VecDeque::from([scripted]))),
        }
    }
}

impl HttpClient for FakeHttp {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.total.set(self.total.get() + 1);
        let body = request.body.as_deref().unwrap_or_default();
        let mut routes = self.routes.borrow_mut();
        let Some((key, queue)) = routes
            .iter_mut()
            .find(|(k, _)| request.url.contains(k.as_str()) || body.contains(k.as_str()))
        else {
            return Err(TransportError::Network(format!("no route for {}", request.url)));
        };
        *self.calls.borrow_mut().entry(key.clone()).or_default() += 1;
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("exhausted".into())))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Network("exhausted".into())))
        }
    }
}

// ── Clock ───────────────────────────────────────────────────────

/// Manual clock; `sleep` records the wait and advances time instantly.
pub struct FakeClock {
    now: Cell<DateTime<Utc>>,
    slept: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn at(iso: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(iso)
            .expect("valid RFC 3339 timestamp")
            .with_timezone(&Utc);
        Self {
            now: Cell::new(now),
            slept: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        self.now.set(self.now.get() + by);
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
        let step = chrono::TimeDelta::from_std(duration).unwrap_or_default();
        self.advance(step);
    }
}

// ── Store ───────────────────────────────────────────────────────

/// Row store backed by plain vectors, with switchable failures.
#[derive(Default)]
pub struct FakeStore {
    pub packages: RefCell<Vec<Package>>,
    pub integrations: RefCell<Vec<Integration>>,
    pub customers: RefCell<Vec<CustomerContact>>,
    pub notifications: RefCell<Vec<Notification>>,
    pub logs: RefCell<Vec<IntegrationLog>>,
    pub fail_integrations: Cell<bool>,
    pub fail_enqueue: Cell<bool>,
    /// Package ids whose next write reports a lost race.
    pub conflict_on: RefCell<Vec<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_integration(&self, integration: Integration) {
        self.integrations.borrow_mut().push(integration);
    }

    pub fn add_package(&self, package: Package) {
        self.packages.borrow_mut().push(package);
    }

    pub fn add_customer(&self, customer: CustomerContact) {
        self.customers.borrow_mut().push(customer);
    }

    pub fn package(&self, id: &str) -> Package {
        self.packages
            .borrow()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .expect("package exists")
    }

    pub fn integration(&self, id: &str) -> Integration {
        self.integrations
            .borrow()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .expect("integration exists")
    }

    fn take_conflict(&self, id: &str) -> bool {
        let mut conflicts = self.conflict_on.borrow_mut();
        match conflicts.iter().position(|c| c == id) {
            Some(pos) => {
                conflicts.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Apply `f` to the package if its refresh marker still matches.
    fn conditional<F>(&self, id: &str, expected: Option<&str>, f: F) -> bool
    where
        F: FnOnce(&mut Package),
    {
        if self.take_conflict(id) {
            return false;
        }
        let mut packages = self.packages.borrow_mut();
        match packages.iter_mut().find(|p| p.id == id) {
            Some(p) if p.last_tracking_update.as_deref() == expected => {
                f(p);
                true
            }
            _ => false,
        }
    }
}

impl PackageStore for FakeStore {
    async fn active_carrier_integrations(&self) -> TrackingResult<Vec<Integration>> {
        if self.fail_integrations.get() {
            return Err(TrackingError::persistence("D1_ERROR: no such table: integrations"));
        }
        Ok(self
            .integrations
            .borrow()
            .iter()
            .filter(|i| i.is_active && i.is_connected && i.service_type == "carrier")
            .cloned()
            .collect())
    }

    async fn integration_by_id(&self, id: &str) -> TrackingResult<Option<Integration>> {
        Ok(self.integrations.borrow().iter().find(|i| i.id == id).cloned())
    }

    async fn due_packages(
        &self,
        carriers: &[Carrier],
        stale_before: &str,
        limit: u32,
    ) -> TrackingResult<Vec<Package>> {
        let mut due: Vec<Package> = self
            .packages
            .borrow()
            .iter()
            .filter(|p| carriers.contains(&p.carrier))
            .filter(|p| POLLED_STATUSES.contains(&p.status))
            .filter(|p| !p.tracking_number.trim().is_empty())
            .filter(|p| match p.last_tracking_update.as_deref() {
                None => true,
                Some(ts) => ts < stale_before,
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.last_tracking_update.cmp(&b.last_tracking_update));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn package_by_id(&self, id: &str) -> TrackingResult<Option<Package>> {
        Ok(self.packages.borrow().iter().find(|p| p.id == id).cloned())
    }

    async fn update_tracking(&self, update: &PackageUpdate) -> TrackingResult<bool> {
        Ok(self.conditional(
            &update.package_id,
            update.expected_last_update.as_deref(),
            |p| {
                p.status = update.status;
                p.tracking_history = update.tracking_history.clone();
                if update.estimated_delivery.is_some() {
                    p.estimated_delivery = update.estimated_delivery.clone();
                }
                p.last_tracking_update = Some(update.updated_at.clone());
            },
        ))
    }

    async fn touch_tracking(
        &self,
        package_id: &str,
        expected_last_update: Option<&str>,
        now: &str,
    ) -> TrackingResult<bool> {
        Ok(self.conditional(package_id, expected_last_update, |p| {
            p.last_tracking_update = Some(now.to_string());
        }))
    }

    async fn customer_contact(&self, customer_id: &str) -> TrackingResult<Option<CustomerContact>> {
        Ok(self
            .customers
            .borrow()
            .iter()
            .find(|c| c.id == customer_id)
            .cloned())
    }

    async fn enqueue_notification(&self, notification: &Notification) -> TrackingResult<String> {
        if self.fail_enqueue.get() {
            return Err(TrackingError::persistence("D1_ERROR: notification_queue is read-only"));
        }
        let mut queue = self.notifications.borrow_mut();
        queue.push(notification.clone());
        Ok(format!("ntf-{}", queue.len()))
    }

    async fn record_integration_log(&self, log: &IntegrationLog) -> TrackingResult<()> {
        self.logs.borrow_mut().push(log.clone());
        Ok(())
    }

    async fn record_integration_sync(
        &self,
        integration_id: &str,
        synced_at: &str,
        last_error: Option<&str>,
    ) -> TrackingResult<()> {
        if let Some(i) = self
            .integrations
            .borrow_mut()
            .iter_mut()
            .find(|i| i.id == integration_id)
        {
            i.last_sync_at = Some(synced_at.to_string());
            i.last_error = last_error.map(str::to_string);
        }
        Ok(())
    }

    async fn record_connection_test(
        &self,
        integration_id: &str,
        connected: bool,
        last_error: Option<&str>,
        _checked_at: &str,
    ) -> TrackingResult<()> {
        if let Some(i) = self
            .integrations
            .borrow_mut()
            .iter_mut()
            .find(|i| i.id == integration_id)
        {
            i.is_connected = connected;
            i.last_error = last_error.map(str::to_string);
        }
        Ok(())
    }
}

// ── Builders ────────────────────────────────────────────────────

pub fn carrier_integration(id: &str, carrier: Carrier) -> Integration {
    Integration {
        id: id.to_string(),
        service_type: "carrier".into(),
        service_name: carrier.as_str().into(),
        credentials: crate::models::Credentials {
            access_token: Some("tok".into()),
            user_id: Some("USER1".into()),
            api_key: Some("key".into()),
        },
        is_active: true,
        is_connected: true,
        last_sync_at: None,
        last_error: None,
    }
}

pub fn package(id: &str, tracking_number: &str, carrier: Carrier, status: PackageStatus) -> Package {
    Package {
        id: id.to_string(),
        tracking_number: tracking_number.to_string(),
        carrier,
        status,
        customer_id: Some("cust-1".into()),
        last_tracking_update: Some("2026-01-10T09:00:00.000Z".into()),
        tracking_history: Vec::new(),
        estimated_delivery: None,
    }
}

pub fn customer(id: &str, email: Option<&str>, phone: Option<&str>) -> CustomerContact {
    CustomerContact {
        id: id.to_string(),
        first_name: Some("Ada".into()),
        email: email.map(str::to_string),
        phone: phone.map(str::to_string),
    }
}
