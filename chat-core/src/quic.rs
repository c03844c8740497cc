//! QUIC endpoints.
//!
//! One QUIC connection is a session; each chat connection or federation link
//! uses exactly one bidirectional stream inside it.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use thiserror::Error;

use crate::tls::{ServerTrust, TlsError, TlsIdentity};

/// ALPN protocol identifier.
pub const ALPN: &[u8] = b"quicchat/1";

/// QUIC transport errors.
#[derive(Debug, Error)]
pub enum QuicError {
    /// Certificate or TLS configuration problem.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// rustls configuration is not usable for QUIC.
    #[error("QUIC crypto configuration error: {0}")]
    Crypto(String),

    /// Failed to bind the UDP socket.
    #[error("failed to bind endpoint: {0}")]
    Bind(#[source] std::io::Error),

    /// Could not resolve an address.
    #[error("could not resolve {address}")]
    Resolve {
        /// Address as given.
        address: String,
    },

    /// Dial rejected before any packet was sent.
    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    /// Session failed or was closed.
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),
}

/// Bind a listening endpoint presenting `identity`.
pub fn server_endpoint(bind: SocketAddr, identity: &TlsIdentity) -> Result<Endpoint, QuicError> {
    let crypto = QuicServerConfig::try_from(identity.server_crypto()?)
        .map_err(|e| QuicError::Crypto(e.to_string()))?;
    let config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

    Endpoint::server(config, bind).map_err(QuicError::Bind)
}

/// Bind a dialing endpoint for the address family of `remote`.
pub fn client_endpoint(remote: SocketAddr, trust: &ServerTrust) -> Result<Endpoint, QuicError> {
    let crypto = QuicClientConfig::try_from(trust.client_crypto()?)
        .map_err(|e| QuicError::Crypto(e.to_string()))?;

    let local: SocketAddr = if remote.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let mut endpoint = Endpoint::client(local).map_err(QuicError::Bind)?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));
    Ok(endpoint)
}

/// Connect to `remote` and open the session's single bidirectional stream.
pub async fn open_stream(
    endpoint: &Endpoint,
    remote: SocketAddr,
    server_name: &str,
) -> Result<(Connection, SendStream, RecvStream), QuicError> {
    let connection = endpoint.connect(remote, server_name)?.await?;
    let (send, recv) = connection.open_bi().await?;
    tracing::debug!("Opened stream to {} ({})", remote, server_name);
    Ok((connection, send, recv))
}

/// Resolve `host:port`, preferring IPv4 results.
pub async fn resolve(address: &str) -> Result<SocketAddr, QuicError> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|_| QuicError::Resolve {
            address: address.to_string(),
        })?
        .collect();

    resolved
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| QuicError::Resolve {
            address: address.to_string(),
        })
}
