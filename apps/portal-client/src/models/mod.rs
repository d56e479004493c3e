pub mod message;
pub mod notification;
pub mod room;

pub use message::{Attachment, AttachmentSource, ChatMessage, MessageIdentity, Sender, SenderRole};
pub use notification::{Notification, NotificationKind, NotificationPayload};
pub use room::{RoomStatus, SupportRoom};
