pub mod feed;
pub mod read_state;

pub use feed::NotificationFeed;
pub use read_state::NotificationReadState;
