use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    ServiceStatusChanged,
    InvoiceGenerated,
    PaymentFailed,
    TicketReplied,
    /// Categories introduced server-side after this client shipped.
    #[serde(other)]
    Other,
}

/// Opaque structured payload attached to a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    /// Reference ids for the entity the notification points at
    /// (service id, invoice id, ticket id, ...). Shape is owned by the server.
    #[serde(default)]
    pub references: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub payload: NotificationPayload,
    pub created_at: DateTime<Utc>,
    /// Monotonic: once set, never cleared by the client.
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_kebab_case_and_tolerates_unknown() {
        let kind: NotificationKind = serde_json::from_str("\"payment-failed\"").unwrap();
        assert_eq!(kind, NotificationKind::PaymentFailed);

        let kind: NotificationKind = serde_json::from_str("\"totally-new-thing\"").unwrap();
        assert_eq!(kind, NotificationKind::Other);
    }

    #[test]
    fn unread_tracks_read_at() {
        let raw = serde_json::json!({
            "id": "not_01",
            "kind": "invoice-generated",
            "payload": { "title": "Invoice ready", "message": "Invoice #42 is available" },
            "created_at": "2026-01-05T10:00:00Z",
            "read_at": null,
        });
        let n: Notification = serde_json::from_value(raw).unwrap();
        assert!(n.is_unread());
    }
}
