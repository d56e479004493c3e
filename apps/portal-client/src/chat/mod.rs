pub mod controller;
pub mod dock;
pub mod pipeline;
pub mod preview;
pub mod room;

pub use controller::ChatController;
pub use dock::{ChatDockController, Conversation, DockState};
pub use pipeline::OptimisticMessagePipeline;
pub use preview::PreviewRegistry;
pub use room::{AppendOutcome, RoomMessages};
