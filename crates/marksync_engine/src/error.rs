//! Error types for the sync engine.

use marksync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or push transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// No principal is signed in.
    #[error("no signed-in principal")]
    NotSignedIn,

    /// Fetching the collection failed.
    #[error("failed to load bookmarks: {0}")]
    Load(String),

    /// The remote store rejected an insert or delete.
    #[error("write rejected: {0}")]
    Write(String),

    /// User input failed validation.
    #[error("invalid bookmark: {0}")]
    Validation(#[from] ProtocolError),

    /// The session has been torn down.
    #[error("sync session closed")]
    Closed,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Load(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error should be shown to the user as an
    /// actionable failure rather than a status indicator.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            SyncError::Write(_)
                | SyncError::Validation(_)
                | SyncError::Load(_)
                | SyncError::NotSignedIn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("bad credentials").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Load("503".into()).is_retryable());
        assert!(!SyncError::Write("constraint".into()).is_retryable());
        assert!(!SyncError::Closed.is_retryable());
    }

    #[test]
    fn user_facing_errors() {
        assert!(SyncError::Write("denied".into()).is_user_facing());
        assert!(SyncError::from(ProtocolError::EmptyTitle).is_user_facing());
        assert!(!SyncError::transport_retryable("reset").is_user_facing());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotSignedIn.to_string(), "no signed-in principal");
        assert_eq!(
            SyncError::Validation(ProtocolError::EmptyUrl).to_string(),
            "invalid bookmark: bookmark url must not be empty"
        );
    }
}
