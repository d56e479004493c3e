use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = anchorhost_common::id::prefixed_ulid("cor");
/// assert!(id.starts_with("cor_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Marker trait for types that represent a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate() -> String {
        prefixed_ulid(Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const NOTIFICATION: &str = "not";
    pub const MESSAGE: &str = "msg";
    pub const CORRELATION: &str = "cor";
    pub const ATTACHMENT: &str = "att";
    pub const ROOM: &str = "room";
    pub const EVENT: &str = "evt";
}
