use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Customer-facing message written to `notification_queue`.
///
/// Created here with status `pending`; an external sender delivers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub customer_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub status: NotificationStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// Contact details needed to address a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerContact {
    pub id: String,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}
