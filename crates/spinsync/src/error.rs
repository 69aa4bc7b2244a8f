//! Error types.
//!
//! Remote and persistence adapters report failures through `anyhow`; the core
//! folds them into [`SyncError`] so callers can match on a category.

use thiserror::Error;

/// Why a user intent did not change anything.
///
/// These are routine UI states (a disabled button pressed), not failures,
/// so they travel in [`Outcome::NoOp`](crate::Outcome::NoOp) rather than as a
/// [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Every roster identifier is already drawn.
    NothingToDraw,
    /// No local undo record exists.
    NothingToUndo,
    /// The session has not reached `Ready` yet.
    NotReady,
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoOpReason::NothingToDraw => f.write_str("nothing left to draw"),
            NoOpReason::NothingToUndo => f.write_str("nothing to undo"),
            NoOpReason::NotReady => f.write_str("session is not ready"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote store unavailable during {operation}: {message}")]
    RemoteUnavailable {
        operation: &'static str,
        message: String,
    },

    #[error("invalid session document: {0}")]
    InvalidDocument(String),

    #[error("session engine has shut down")]
    Closed,
}

/// Coarse category of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RemoteUnavailable,
    InvalidDocument,
    Closed,
}

impl SyncError {
    pub fn remote(operation: &'static str, err: &anyhow::Error) -> Self {
        SyncError::RemoteUnavailable {
            operation,
            message: format!("{err:#}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            SyncError::InvalidDocument(_) => ErrorKind::InvalidDocument,
            SyncError::Closed => ErrorKind::Closed,
        }
    }
}

/// Problems with a [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("roster must contain at least one identifier")]
    EmptyRoster,

    #[error("duplicate roster identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}
