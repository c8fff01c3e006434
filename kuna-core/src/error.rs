//! Error types for the kuna sync engine.

use thiserror::Error;

/// Errors that can occur in sync operations.
#[derive(Error, Debug)]
pub enum KunaError {
    #[error("Calendar access denied")]
    PermissionDenied,

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("Fetching tasks failed: {0}")]
    RemoteFetchFailed(String),

    #[error("Committing calendar changes failed: {0}")]
    StoreCommitFailed(String),

    #[error("Calendar store error: {0}")]
    Store(String),

    #[error("Task service error: {0}")]
    Remote(String),

    #[error("Cannot {action} while sync is {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KunaError {
    /// Errors that end the current pass immediately rather than being
    /// recorded against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KunaError::PermissionDenied
                | KunaError::CalendarUnavailable(_)
                | KunaError::RemoteFetchFailed(_)
                | KunaError::StoreCommitFailed(_)
        )
    }
}

impl From<serde_json::Error> for KunaError {
    fn from(e: serde_json::Error) -> Self {
        KunaError::Serialization(e.to_string())
    }
}

/// Result type alias for sync operations.
pub type KunaResult<T> = Result<T, KunaError>;
