//! Dialing the partner server.

use async_trait::async_trait;
use chat_core::{client_endpoint, open_stream, resolve, PduWriter, ServerTrust};
use quinn::{Connection, Endpoint};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::FederationResult;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A freshly dialed stream to the partner, before PEER_CONNECT.
pub struct PeerStream {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: PduWriter,
    pub(crate) session: Option<QuicSession>,
}

impl PeerStream {
    /// Wrap the two halves of a stream.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: PduWriter::new(writer),
            session: None,
        }
    }

    /// Keep the QUIC session that carries this stream alive with it.
    pub fn with_session(mut self, endpoint: Endpoint, connection: Connection) -> Self {
        self.session = Some(QuicSession {
            _endpoint: endpoint,
            connection,
        });
        self
    }
}

impl std::fmt::Debug for PeerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStream")
            .field("writer", &self.writer)
            .field("quic", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

/// QUIC endpoint and connection backing a federation stream.
pub(crate) struct QuicSession {
    _endpoint: Endpoint,
    connection: Connection,
}

impl QuicSession {
    pub(crate) fn close(&self) {
        self.connection.close(0u32.into(), b"federation link closed");
    }
}

/// Opens streams to the partner server.
///
/// Implementations handle the underlying connection mechanism (QUIC, or an
/// in-memory pipe in tests).
#[async_trait]
pub trait PeerDialer: Send + Sync {
    /// Open one stream to the partner.
    async fn dial(&self) -> FederationResult<PeerStream>;

    /// Partner address, for logs.
    fn peer(&self) -> &str;
}

/// Dials the partner over QUIC.
#[derive(Debug, Clone)]
pub struct QuicDialer {
    address: String,
    server_name: String,
    trust: ServerTrust,
}

impl QuicDialer {
    /// Dialer for `address` (`host:port`), expecting a certificate for
    /// `server_name`.
    pub fn new(address: &str, server_name: &str, trust: ServerTrust) -> Self {
        Self {
            address: address.to_string(),
            server_name: server_name.to_string(),
            trust,
        }
    }
}

#[async_trait]
impl PeerDialer for QuicDialer {
    async fn dial(&self) -> FederationResult<PeerStream> {
        let remote = resolve(&self.address).await?;
        let endpoint = client_endpoint(remote, &self.trust)?;
        let (connection, send, recv) = open_stream(&endpoint, remote, &self.server_name).await?;

        Ok(PeerStream::new(recv, send).with_session(endpoint, connection))
    }

    fn peer(&self) -> &str {
        &self.address
    }
}
