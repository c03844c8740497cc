//! QUIC session handling.
//!
//! A session is one QUIC connection. Every bidirectional stream it opens is
//! served by its own [`StreamHandler`] task.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chat_core::PduWriter;
use quinn::{Connection, ConnectionError};

use crate::handler::StreamHandler;
use crate::server::ChatRelay;

/// Application close code sent when a stream fails authentication.
pub const CLOSE_AUTH_FAILED: u32 = 1;

/// One accepted QUIC connection.
pub struct Session {
    relay: Arc<ChatRelay>,
    connection: Connection,
}

impl Session {
    /// Wrap an established connection.
    pub fn new(relay: Arc<ChatRelay>, connection: Connection) -> Self {
        Self { relay, connection }
    }

    /// Remote address of the session.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Accept streams until the connection ends.
    pub async fn run(self) {
        let remote = self.remote_address();
        tracing::info!("New session from {}", remote);

        loop {
            let (send, recv) = match self.connection.accept_bi().await {
                Ok(stream) => stream,
                Err(ConnectionError::ApplicationClosed(_))
                | Err(ConnectionError::LocallyClosed) => {
                    tracing::debug!("Session {} closed", remote);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Session {} ended: {}", remote, e);
                    break;
                }
            };

            self.relay
                .metrics()
                .streams_total
                .fetch_add(1, Ordering::Relaxed);

            let label = format!("{}/{}", remote, send.id());
            let handler = StreamHandler::new(self.relay.clone(), recv, PduWriter::new(send))
                .with_label(label.clone());
            let connection = self.connection.clone();

            // Spawn stream handler - don't block the accept loop
            tokio::spawn(async move {
                match handler.run().await {
                    Ok(()) => {}
                    Err(e) if e.is_auth_failure() => {
                        connection.close(CLOSE_AUTH_FAILED.into(), b"authentication failed");
                    }
                    Err(e) => tracing::debug!("{}: stream ended: {}", label, e),
                }
            });
        }
    }
}
