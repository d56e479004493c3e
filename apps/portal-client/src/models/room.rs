use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Open,
    Closed,
}

/// Server-owned support room. The client holds a read-mostly cached copy
/// invalidated by push events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRoom {
    pub id: String,
    pub status: RoomStatus,
    /// The portal user this room belongs to.
    pub participant_id: String,
}

impl SupportRoom {
    pub fn is_open(&self) -> bool {
        self.status == RoomStatus::Open
    }
}
