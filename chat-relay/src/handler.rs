//! Per-stream protocol state machine.
//!
//! Every accepted stream, whether from a chat client or from the partner's
//! federation link, gets one [`StreamHandler`]. The first PDU must be
//! CLIENT_CONNECT or PEER_CONNECT with the shared secret; anything else
//! closes the stream without a reply.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chat_core::{read_pdu, PduWriter};
use chat_types::{ConnectRequest, DirectMessage, Pdu, PduType};
use tokio::io::AsyncRead;

use crate::directory::OwnerId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::{ChatRelay, Origin};

/// Stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Waiting for CONNECT.
    Unauthenticated,
    /// Authenticated chat client, registered in the directory.
    Client {
        /// Registered nickname.
        nickname: String,
        /// Token for removing the registration.
        owner: OwnerId,
    },
    /// Authenticated partner server.
    Peer {
        /// Name the partner announced.
        server_name: String,
    },
    /// Stream closed.
    Closed,
}

impl StreamState {
    /// Whether CONNECT has succeeded.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Client { .. } | Self::Peer { .. })
    }

    fn origin(&self) -> Option<Origin> {
        match self {
            Self::Client { .. } => Some(Origin::Client),
            Self::Peer { .. } => Some(Origin::Peer),
            Self::Unauthenticated | Self::Closed => None,
        }
    }
}

/// Serves one stream until it closes.
pub struct StreamHandler<R> {
    relay: Arc<ChatRelay>,
    reader: R,
    writer: PduWriter,
    state: StreamState,
    label: String,
}

impl<R> StreamHandler<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Create a handler for a stream's two halves.
    pub fn new(relay: Arc<ChatRelay>, reader: R, writer: PduWriter) -> Self {
        Self {
            relay,
            reader,
            writer,
            state: StreamState::Unauthenticated,
            label: "stream".to_string(),
        }
    }

    /// Name used for this stream in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Read and dispatch PDUs until the stream ends.
    ///
    /// Returns `Ok(())` when the peer closes the stream cleanly. A client's
    /// directory entry is removed on every exit path.
    pub async fn run(mut self) -> ProtocolResult<()> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> ProtocolResult<()> {
        loop {
            let Some(pdu) = read_pdu(&mut self.reader).await? else {
                tracing::debug!("{}: closed by peer", self.label);
                return Ok(());
            };

            if self.state.is_authenticated() {
                self.handle_request(pdu).await?;
            } else {
                self.authenticate(pdu).await?;
            }
        }
    }

    async fn authenticate(&mut self, pdu: Pdu) -> ProtocolResult<()> {
        let kind = pdu.kind.base();
        if kind != PduType::CLIENT_CONNECT && kind != PduType::PEER_CONNECT {
            tracing::warn!("{}: {} before CONNECT, closing", self.label, pdu.kind);
            self.relay
                .metrics()
                .auth_failures
                .fetch_add(1, Ordering::Relaxed);
            return Err(ProtocolError::NotAuthenticated { received: pdu.kind });
        }

        let request = pdu
            .payload_str()
            .and_then(ConnectRequest::parse)
            .ok()
            .filter(|r| !r.name.is_empty() && self.relay.check_secret(&r.secret));
        let Some(request) = request else {
            tracing::warn!("{}: authentication failed", self.label);
            self.relay
                .metrics()
                .auth_failures
                .fetch_add(1, Ordering::Relaxed);
            return Err(ProtocolError::AuthenticationFailed);
        };

        let metrics = self.relay.metrics();
        if kind == PduType::CLIENT_CONNECT {
            let owner = self
                .relay
                .directory()
                .register(&request.name, self.writer.clone());
            tracing::info!("{}: client {} connected", self.label, request.name);
            metrics.clients_authenticated.fetch_add(1, Ordering::Relaxed);
            self.state = StreamState::Client {
                nickname: request.name.clone(),
                owner,
            };
        } else {
            tracing::info!("{}: partner server {} connected", self.label, request.name);
            metrics.peers_authenticated.fetch_add(1, Ordering::Relaxed);
            self.state = StreamState::Peer {
                server_name: request.name.clone(),
            };
        }

        self.writer
            .send(&Pdu::text(PduType::DATA | PduType::ACK, &request.name))
            .await?;
        Ok(())
    }

    async fn handle_request(&mut self, pdu: Pdu) -> ProtocolResult<()> {
        match pdu.kind.base() {
            PduType::LIST => self.handle_list().await,
            PduType::PEER_LIST => self.reply_local_list().await,
            PduType::DM => {
                self.handle_direct_message(&pdu).await;
                Ok(())
            }
            PduType::PING => {
                tracing::trace!("{}: ping", self.label);
                Ok(())
            }
            _ => {
                tracing::debug!("{}: ignoring {}", self.label, pdu.kind);
                Ok(())
            }
        }
    }

    async fn handle_list(&mut self) -> ProtocolResult<()> {
        // The partner only ever gets our own names.
        if matches!(self.state, StreamState::Peer { .. }) {
            return self.reply_local_list().await;
        }

        match self.relay.list_nicknames().await {
            Ok(list) => self.writer.send(&Pdu::text(PduType::DATA, &list)).await?,
            Err(e) => tracing::warn!("{}: LIST failed, no reply sent: {}", self.label, e),
        }
        Ok(())
    }

    async fn reply_local_list(&mut self) -> ProtocolResult<()> {
        let list = self.relay.local_nicknames();
        self.writer.send(&Pdu::text(PduType::DATA, &list)).await?;
        Ok(())
    }

    async fn handle_direct_message(&mut self, pdu: &Pdu) {
        let dm = match pdu.payload_str().and_then(DirectMessage::parse) {
            Ok(dm) => dm,
            Err(e) => {
                tracing::warn!("{}: ignoring malformed DM: {}", self.label, e);
                return;
            }
        };

        if let Some(origin) = self.state.origin() {
            self.relay.route_direct_message(&dm, origin).await;
        }
    }

    async fn close(&mut self) {
        if let StreamState::Client { nickname, owner } = &self.state {
            if self.relay.directory().remove(nickname, *owner) {
                tracing::info!("{}: client {} disconnected", self.label, nickname);
            }
        }
        self.state = StreamState::Closed;

        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("{}: shutdown failed: {}", self.label, e);
        }
    }
}
