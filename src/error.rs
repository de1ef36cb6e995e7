//! Typed errors for the store, migrator and sync layers.

use thiserror::Error;

/// Failure reported by the task-list fetch collaborator.
///
/// `Unauthorized` is kept distinct from `Network` so the caller can force
/// re-authentication instead of silently retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Network(String),
    #[error("credentials rejected by server")]
    Unauthorized,
    #[error("malformed task list response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Stable outcome key used when aggregating sync errors.
    pub fn key(&self) -> &'static str {
        match self {
            TransportError::Network(_) => "err_network",
            TransportError::Unauthorized => "err_unauthorized",
            TransportError::Malformed(_) => "err_malformed",
        }
    }
}

/// Errors surfaced by the instance and trace stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A migration step failed. The store is left at the last successfully
    /// completed version; re-opening retries the remaining steps.
    #[error("schema migration to version {version} failed: {message}")]
    Schema { version: i32, message: String },

    /// A uniqueness or check constraint was violated on write. The write did
    /// not apply; callers must not assume partial effects.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(i64),

    /// The task carries a location trigger and may only be opened by
    /// resolving that trigger, never by direct selection.
    #[error("task {0} may only be started from its location trigger")]
    TriggerRequired(i64),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Database(rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, message)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Integrity(message.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
