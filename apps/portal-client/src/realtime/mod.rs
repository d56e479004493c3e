pub mod connection;
pub mod dispatch;
pub mod subscriptions;
pub mod transport;

pub use connection::{ConnectionState, RealtimeConnection};
pub use dispatch::{channel, EventDispatchRouter, EventName, Toast, ToastSeverity};
pub use subscriptions::{ChannelSubscriptionManager, SubscriptionHandle};
pub use transport::{ConnectionEvent, MemoryTransport, PushEvent, PushTransport};
