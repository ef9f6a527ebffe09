// src/connection/handle.rs

//! Production [`ServerBackend`]: one TCP (or TLS) connection per request,
//! one JSON line each way.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_native_tls::{TlsConnector, native_tls};
use tracing::{debug, warn};

use crate::wire::{Envelope, Request, ServerReply, SyncCursor};

use super::{ConnectionConfig, ConnectionError, ConnectionErrorKind, Credential, ServerBackend};

/// Network session to one remote server endpoint.
///
/// Performs exactly one attempt per [`ServerBackend::send`]. After a failed
/// attempt the next one is delayed until `retry_period` has elapsed.
pub struct ConnectionHandle {
    config: ConnectionConfig,
    credential: Credential,
    cursor: SyncCursor,
    last_failure: Option<Instant>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("address", &self.config.address())
            .field("ssl", &self.config.ssl)
            .field("credential", &self.credential)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub fn new(config: ConnectionConfig, credential: Credential) -> Self {
        Self {
            config,
            credential,
            cursor: SyncCursor::default(),
            last_failure: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> &str {
        &self.config.port
    }

    pub fn cursor(&self) -> SyncCursor {
        self.cursor
    }

    async fn attempt(&mut self, request: Request) -> Result<ServerReply, ConnectionError> {
        if let Some(failed_at) = self.last_failure {
            let earliest = failed_at + self.config.retry_period;
            if earliest > Instant::now() {
                debug!(address = %self.config.address(), "pacing retry after failed attempt");
                time::sleep_until(earliest).await;
            }
        }

        // A reset registers afresh, so it never carries the old cursor.
        let cursor = match request {
            Request::Reset { .. } => SyncCursor::default(),
            _ => self.cursor,
        };
        let envelope = Envelope {
            auth: self.credential.clone(),
            cursor,
            request,
        };

        let outcome = match time::timeout(self.config.timeout, self.exchange(&envelope)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::timeout(format!(
                "no reply from {} within {:?}",
                self.config.address(),
                self.config.timeout
            ))),
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(err) => {
                self.last_failure = Some(Instant::now());
                return Err(err);
            }
        };

        if let Some(cursor) = reply.cursor {
            self.cursor = cursor;
        }

        if let Some(err) = &reply.error {
            if self.config.throw_on_error {
                let err = ConnectionError::from(err.clone());
                if err.is_connection_level() {
                    self.last_failure = Some(Instant::now());
                }
                return Err(err);
            }
            debug!(kind = ?err.kind, "server error returned in reply");
        }

        self.last_failure = None;
        Ok(reply)
    }

    async fn exchange(&self, envelope: &Envelope) -> Result<ServerReply, ConnectionError> {
        let address = self.config.address();
        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|e| ConnectionError::unreachable(format!("{address}: {e}")))?;

        if self.config.ssl {
            let connector = native_tls::TlsConnector::new()
                .map(TlsConnector::from)
                .map_err(|e| ConnectionError::new(ConnectionErrorKind::Tls, e.to_string()))?;
            let tls = connector
                .connect(&self.config.host, tcp)
                .await
                .map_err(|e| {
                    ConnectionError::new(ConnectionErrorKind::Tls, format!("{address}: {e}"))
                })?;
            round_trip(tls, envelope).await
        } else {
            round_trip(tcp, envelope).await
        }
    }
}

/// Write one request line and read one reply line.
async fn round_trip<S>(stream: S, envelope: &Envelope) -> Result<ServerReply, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(envelope)
        .map_err(|e| ConnectionError::protocol(format!("encode request: {e}")))?;
    line.push('\n');

    let mut stream = BufReader::new(stream);
    stream
        .get_mut()
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ConnectionError::unreachable(format!("write request: {e}")))?;
    stream
        .get_mut()
        .flush()
        .await
        .map_err(|e| ConnectionError::unreachable(format!("flush request: {e}")))?;

    let mut reply = String::new();
    let read = stream
        .read_line(&mut reply)
        .await
        .map_err(|e| ConnectionError::protocol(format!("read reply: {e}")))?;
    if read == 0 {
        return Err(ConnectionError::protocol("connection closed before reply"));
    }

    serde_json::from_str(reply.trim_end())
        .map_err(|e| ConnectionError::protocol(format!("decode reply: {e}")))
}

impl ServerBackend for ConnectionHandle {
    fn send(
        &mut self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<ServerReply, ConnectionError>> + Send + '_>> {
        Box::pin(async move {
            let name = request.name();
            let result = self.attempt(request).await;
            if let Err(err) = &result {
                warn!(
                    address = %self.config.address(),
                    request = name,
                    kind = %err.kind,
                    "request failed"
                );
            }
            result
        })
    }

    fn set_credential(&mut self, credential: Credential) {
        debug!(address = %self.config.address(), user = ?credential.user(), "credential replaced");
        self.credential = credential;
    }
}
