use std::fmt;

/// Closed set of failure kinds surfaced by the sync engine.
///
/// The backend's mutation contract only carries a free-text message, so the
/// engine classifies failures at the boundary instead of guessing from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level failure: connection refused, DNS, timeout.
    Network,
    /// The server rejected the request as malformed or incomplete.
    Validation,
    /// The request conflicted with current server state (e.g. room closed).
    Conflict,
    /// Anything the engine could not classify.
    Unknown,
}

/// Application-level error carried by every fallible engine operation.
#[derive(Debug, Clone)]
pub struct SyncError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::Unknown)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        tracing::debug!(?err, "http transport error");
        Self::network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(SyncError::network("x").kind, ErrorKind::Network);
        assert_eq!(SyncError::validation("x").kind, ErrorKind::Validation);
        assert_eq!(SyncError::conflict("x").kind, ErrorKind::Conflict);
        assert_eq!(SyncError::unknown("x").kind, ErrorKind::Unknown);
    }

    #[test]
    fn retryable_kinds() {
        assert!(SyncError::network("x").is_retryable());
        assert!(SyncError::unknown("x").is_retryable());
        assert!(!SyncError::validation("x").is_retryable());
        assert!(!SyncError::conflict("x").is_retryable());
    }
}
