// src/connection/error.rs

//! Typed failures at the connection boundary.

use std::fmt;

use thiserror::Error;

use crate::wire::{ServerError, ServerErrorKind};

/// Why a single request attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The server refused the credential.
    Authentication,
    /// TCP connect failed (host down, port closed, DNS failure).
    Unreachable,
    /// No reply within the client-side timeout.
    Timeout,
    /// TLS handshake failed.
    Tls,
    /// The server processed the request and rejected it.
    Rejected(ServerErrorKind),
    /// The reply could not be read or decoded.
    Protocol,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::Authentication => f.write_str("authentication failed"),
            ConnectionErrorKind::Unreachable => f.write_str("host unreachable"),
            ConnectionErrorKind::Timeout => f.write_str("timed out"),
            ConnectionErrorKind::Tls => f.write_str("tls error"),
            ConnectionErrorKind::Rejected(kind) => write!(f, "rejected ({kind:?})"),
            ConnectionErrorKind::Protocol => f.write_str("protocol error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Unreachable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Protocol, message)
    }

    pub fn rejected(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Rejected(kind), message)
    }

    /// True when the failure says something about the connection rather than
    /// about the particular request.
    pub fn is_connection_level(&self) -> bool {
        !matches!(self.kind, ConnectionErrorKind::Rejected(_))
    }
}

impl From<ServerError> for ConnectionError {
    fn from(err: ServerError) -> Self {
        match err.kind {
            ServerErrorKind::AuthenticationFailed => {
                ConnectionError::new(ConnectionErrorKind::Authentication, err.message)
            }
            kind => ConnectionError::rejected(kind, err.message),
        }
    }
}
