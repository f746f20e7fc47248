use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a keepsake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KeepsakeStatus {
    Pending,
    Scheduled,
    Sent,
    Error,
    Cancelled,
}

impl KeepsakeStatus {
    /// Statuses the notifier picks up once the delivery date has passed.
    pub const AWAITING: [KeepsakeStatus; 2] = [KeepsakeStatus::Pending, KeepsakeStatus::Scheduled];

    pub fn is_awaiting_delivery(self) -> bool {
        Self::AWAITING.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_awaiting_delivery()
    }
}

impl std::fmt::Display for KeepsakeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeepsakeStatus::Pending => write!(f, "pending"),
            KeepsakeStatus::Scheduled => write!(f, "scheduled"),
            KeepsakeStatus::Sent => write!(f, "sent"),
            KeepsakeStatus::Error => write!(f, "error"),
            KeepsakeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Delivery status of a row in `scheduled_notifications`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Error,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Error => write!(f, "error"),
        }
    }
}

/// How a keepsake reaches its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    /// Shipped out of band; only the sender is notified by email.
    Physical,
}

/// Table a due delivery was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverySource {
    Keepsakes,
    ScheduledNotifications,
}

impl DeliverySource {
    pub const ALL: [DeliverySource; 2] =
        [DeliverySource::Keepsakes, DeliverySource::ScheduledNotifications];

    pub fn table(self) -> &'static str {
        match self {
            DeliverySource::Keepsakes => "keepsakes",
            DeliverySource::ScheduledNotifications => "scheduled_notifications",
        }
    }
}

impl std::fmt::Display for DeliverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// A user-authored message scheduled for future delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Keepsake {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message_content: String,
    pub delivery_date: DateTime<Utc>,
    pub status: KeepsakeStatus,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub recipient_name: Option<String>,
    pub recipient_email: String,
    pub recipient_phone: Option<String>,
    pub delivery_channel: DeliveryChannel,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Secondary queue row mirroring the delivery fields of a keepsake.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub keepsake_id: Option<Uuid>,
    pub user_email: String,
    pub recipient_email: String,
    pub message: String,
    pub delivery_date: DateTime<Utc>,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row from either delivery table whose delivery date has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDelivery {
    pub id: Uuid,
    pub source: DeliverySource,
    pub title: Option<String>,
    pub message: String,
    pub delivery_date: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub recipient_name: Option<String>,
    pub recipient_email: String,
    pub channel: DeliveryChannel,
}

impl DueDelivery {
    /// Name shown for the sender, falling back to the address.
    pub fn sender_display(&self) -> &str {
        display_name(self.sender_name.as_deref(), &self.sender_email)
    }

    /// Name shown for the recipient, falling back to the address.
    pub fn recipient_display(&self) -> &str {
        display_name(self.recipient_name.as_deref(), &self.recipient_email)
    }
}

impl From<Keepsake> for DueDelivery {
    fn from(k: Keepsake) -> Self {
        Self {
            id: k.id,
            source: DeliverySource::Keepsakes,
            title: Some(k.title),
            message: k.message_content,
            delivery_date: k.delivery_date,
            sender_name: k.sender_name,
            sender_email: k.sender_email,
            recipient_name: k.recipient_name,
            recipient_email: k.recipient_email,
            channel: k.delivery_channel,
        }
    }
}

impl From<ScheduledNotification> for DueDelivery {
    fn from(n: ScheduledNotification) -> Self {
        Self {
            id: n.id,
            source: DeliverySource::ScheduledNotifications,
            title: None,
            message: n.message,
            delivery_date: n.delivery_date,
            sender_name: None,
            sender_email: n.user_email,
            recipient_name: None,
            recipient_email: n.recipient_email,
            channel: DeliveryChannel::Email,
        }
    }
}

fn display_name<'a>(name: Option<&'a str>, email: &'a str) -> &'a str {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => email,
    }
}

/// Outgoing transactional email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Counters for one notifier pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scanned: u32,
    pub sent: u32,
    pub failed: u32,
}

impl RunSummary {
    pub fn merge(&mut self, other: RunSummary) {
        self.scanned += other.scanned;
        self.sent += other.sent;
        self.failed += other.failed;
    }
}
