use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Client,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub display_name: String,
    pub role: SenderRole,
}

/// Where an attachment's bytes can be rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttachmentSource {
    /// Locally-owned transient preview handle; only valid while the carrying
    /// message is provisional, and released on reconcile or rollback.
    Preview { handle_id: String },
    /// Authoritative URL once the server has stored the attachment.
    Remote { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: AttachmentSource,
}

impl Attachment {
    pub fn is_preview(&self) -> bool {
        matches!(self.source, AttachmentSource::Preview { .. })
    }
}

/// Identity of a chat message: exactly one of provisional or confirmed.
///
/// A provisional message is only ever superseded (by correlation-id match) or
/// removed; it is never duplicated by its confirmed counterpart.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageIdentity {
    /// Client-generated correlation id, assigned at submit time.
    Provisional(String),
    /// Authoritative server id, with the correlation id echoed back for
    /// messages this client originated.
    Confirmed {
        id: String,
        correlation_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub identity: MessageIdentity,
    /// May be empty when the message carries only attachments.
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_provisional(&self) -> bool {
        matches!(self.identity, MessageIdentity::Provisional(_))
    }

    /// The correlation id, whichever side of confirmation the message is on.
    pub fn correlation_id(&self) -> Option<&str> {
        match &self.identity {
            MessageIdentity::Provisional(cor) => Some(cor),
            MessageIdentity::Confirmed { correlation_id, .. } => correlation_id.as_deref(),
        }
    }

    /// The authoritative server id, if confirmed.
    pub fn server_id(&self) -> Option<&str> {
        match &self.identity {
            MessageIdentity::Provisional(_) => None,
            MessageIdentity::Confirmed { id, .. } => Some(id),
        }
    }
}
