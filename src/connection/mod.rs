// src/connection/mod.rs

//! Connection layer: how one request reaches one server.
//!
//! The dispatch worker talks to a [`ServerBackend`] instead of a socket.
//! Production code uses [`ConnectionHandle`]; tests plug in a scripted
//! backend that records requests and can hold replies back.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{Request, ServerReply};

pub mod error;
pub mod handle;

pub use error::{ConnectionError, ConnectionErrorKind};
pub use handle::ConnectionHandle;

/// Who we are to the server: a user with a password, or a bearer token.
/// The enum makes "both set" unrepresentable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Credential {
    Password { user: String, password: String },
    Token { token: String },
}

impl Credential {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Credential::Token {
            token: token.into(),
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Credential::Password { user, .. } => Some(user),
            Credential::Token { .. } => None,
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Static settings of a connection handle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: String,
    pub ssl: bool,
    /// Client-side limit for one request, connect included.
    pub timeout: Duration,
    /// Minimum spacing between a failed attempt and the next attempt.
    pub retry_period: Duration,
    /// Turn server error replies into `Err(Rejected)`.
    pub throw_on_error: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ssl: false,
            timeout: Duration::from_secs(30),
            retry_period: Duration::from_secs(1),
            throw_on_error: true,
        }
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period;
        self
    }

    pub fn with_throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Trait abstracting how a request reaches the server.
///
/// Implementations perform exactly one attempt per call; retrying is up to
/// the session.
pub trait ServerBackend: Send {
    fn send(
        &mut self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<ServerReply, ConnectionError>> + Send + '_>>;

    /// Replace the credential used for subsequent requests.
    fn set_credential(&mut self, credential: Credential);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let pw = format!("{:?}", Credential::password("alice", "s3cret"));
        assert!(pw.contains("alice"));
        assert!(!pw.contains("s3cret"));

        let tok = format!("{:?}", Credential::token("abc.def"));
        assert!(!tok.contains("abc.def"));
    }

    #[test]
    fn credential_serializes_with_scheme_tag() {
        let json = serde_json::to_string(&Credential::token("t")).unwrap();
        assert_eq!(json, r#"{"scheme":"token","token":"t"}"#);
    }
}
