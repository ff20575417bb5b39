//! Customer notifications for actionable status changes.

use serde_json::json;
use tracing::{debug, info};

use crate::error::TrackingResult;
use crate::models::{
    Channel, CustomerContact, Notification, NotificationStatus, Package, PackageStatus,
};
use crate::store::PackageStore;

/// Statuses a customer is told about. Routine transit scans are not.
const NOTIFY_ON: [PackageStatus; 3] = [
    PackageStatus::OutForDelivery,
    PackageStatus::Delivered,
    PackageStatus::Exception,
];

pub fn should_notify(old: PackageStatus, new: PackageStatus) -> bool {
    new != old && NOTIFY_ON.contains(&new)
}

/// Subject and body for a status, keyed by the new status.
pub fn template(status: PackageStatus, tracking_number: &str) -> (String, String) {
    match status {
        PackageStatus::OutForDelivery => (
            "Package Out for Delivery".into(),
            format!(
                "Your package with tracking number {tracking_number} is out for delivery and should arrive today."
            ),
        ),
        PackageStatus::Delivered => (
            "Package Delivered".into(),
            format!("Your package with tracking number {tracking_number} has been delivered."),
        ),
        PackageStatus::Exception => (
            "Package Delivery Exception".into(),
            format!(
                "There was an issue with your package delivery ({tracking_number}). Please contact us for more information."
            ),
        ),
        other => (
            "Package Status Update".into(),
            format!(
                "Your package with tracking number {tracking_number} status has been updated to: {other}"
            ),
        ),
    }
}

/// Address a notification: email first, SMS as the fallback.
pub fn build_notification(
    contact: &CustomerContact,
    package: &Package,
    status: PackageStatus,
    created_at: &str,
) -> Option<Notification> {
    let (channel, recipient) = match (non_blank(&contact.email), non_blank(&contact.phone)) {
        (Some(email), _) => (Channel::Email, email),
        (None, Some(phone)) => (Channel::Sms, phone),
        (None, None) => return None,
    };
    let (subject, content) = template(status, &package.tracking_number);

    Some(Notification {
        customer_id: contact.id.clone(),
        channel,
        recipient: recipient.to_string(),
        subject,
        content,
        status: NotificationStatus::Pending,
        metadata: Some(json!({
            "package_id": package.id,
            "tracking_number": package.tracking_number,
            "new_status": status.as_str(),
        })),
        created_at: created_at.to_string(),
    })
}

/// Queue a notification for `package` moving to `status`, stamped `now`.
///
/// Returns `Ok(false)` when the customer cannot be reached; store failures
/// propagate.
pub async fn notify_status_change<S: PackageStore>(
    store: &S,
    package: &Package,
    status: PackageStatus,
    now: &str,
) -> TrackingResult<bool> {
    let Some(customer_id) = package.customer_id.as_deref() else {
        debug!(package_id = %package.id, "package has no customer, skipping notification");
        return Ok(false);
    };
    let Some(contact) = store.customer_contact(customer_id).await? else {
        debug!(package_id = %package.id, customer_id, "customer not found, skipping notification");
        return Ok(false);
    };
    let Some(notification) = build_notification(&contact, package, status, now) else {
        info!(package_id = %package.id, customer_id, "customer has no email or phone, skipping notification");
        return Ok(false);
    };

    let id = store.enqueue_notification(&notification).await?;
    info!(
        notification_id = %id,
        package_id = %package.id,
        channel = notification.channel.as_str(),
        status = %status,
        "notification queued"
    );
    Ok(true)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
