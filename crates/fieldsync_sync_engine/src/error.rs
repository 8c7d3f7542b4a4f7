//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote refused the change (validation, permissions). Retrying
    /// the same change will not help.
    #[error("rejected by remote: {reason}")]
    Rejected {
        /// Reason given by the remote.
        reason: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] fieldsync_core::CoreError),

    /// Local file error (photo or tile files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote change stream ended.
    #[error("remote subscription closed")]
    SubscriptionClosed,

    /// Work was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// No worker can be built for the request.
    #[error("no worker available: {0}")]
    UnknownWorker(String),

    /// The work request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
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

    /// Creates a rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::SubscriptionClosed | SyncError::Store(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::CoreError;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::SubscriptionClosed.is_retryable());
        assert!(SyncError::from(CoreError::JournalPoisoned).is_retryable());
        assert!(!SyncError::rejected("bad layer").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::rejected("bad layer").to_string(), "rejected by remote: bad layer");
        assert_eq!(SyncError::SubscriptionClosed.to_string(), "remote subscription closed");
    }
}
