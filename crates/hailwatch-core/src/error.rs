//! Error taxonomy for the session core.
//!
//! Every error here carries a one-line message suitable for showing inline on
//! a login or registration screen. The session manager is the boundary that
//! turns these into state transitions; nothing below it retries.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The backend could not be reached (connect failure, timeout).
    Unreachable,
    /// The backend answered with a non-2xx status.
    Rejected { status: u16 },
    /// The backend answered 2xx but the body was not what we expected.
    InvalidResponse,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Unreachable => write!(f, "unreachable"),
            TransportErrorKind::Rejected { status } => write!(f, "rejected ({status})"),
            TransportErrorKind::InvalidResponse => write!(f, "invalid_response"),
        }
    }
}

/// Failure while talking to the authentication backend.
///
/// `message` is already normalized for display: either the backend's own
/// `msg` field verbatim or one of the canned messages in
/// [`crate::auth::transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unreachable, message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected { status }, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidResponse, message)
    }

    /// HTTP status of a rejected request, if any.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Rejected { status } => Some(status),
            _ => None,
        }
    }
}

/// The token could not be decoded into a claims record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed session token: {reason}")]
pub struct MalformedTokenError {
    pub reason: String,
}

impl MalformedTokenError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Durable storage could not be read or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to {action} {}: {cause}", .path.display())]
pub struct PersistenceError {
    pub action: &'static str,
    pub path: PathBuf,
    pub cause: String,
}

impl PersistenceError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, cause: impl fmt::Display) -> Self {
        Self {
            action,
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

/// Why a login attempt (or a rehydrated session) did not produce an
/// authenticated state. Carried by `AuthState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    MalformedToken(#[from] MalformedTokenError),
    #[error("Session token has already expired")]
    TokenExpired,
    #[error("A login is already in progress")]
    LoginInProgress,
    #[error("Login was cancelled by a logout")]
    Cancelled,
}

impl SessionError {
    /// The string shown in the UI error slot.
    pub fn display_message(&self) -> String {
        self.to_string()
    }
}
