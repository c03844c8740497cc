//! # chat-core
//!
//! Shared runtime plumbing for quicchat servers and clients.
//!
//! - [`io`] - PDU framing over any async byte stream, plus the shared writer
//!   handle used when several tasks write to one stream
//! - [`keepalive`] - Periodic PING sender bound to a stream
//! - [`tls`] - Certificate/key provisioning and client trust
//! - [`quic`] - QUIC endpoints and stream dialing
//!
//! ## Architecture
//!
//! ```text
//! chat-relay ──┐
//!              ├──► chat-core (io, keepalive, quic/tls) ──► quinn
//! chat-client ─┘           │
//!                          └──► chat-types (PDU codec)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod io;
pub mod keepalive;
pub mod quic;
pub mod tls;

pub use io::{read_pdu, PduIoError, PduWriter};
pub use keepalive::{
    spawn_keepalive, KeepaliveStopped, DEFAULT_KEEPALIVE_INTERVAL, MIN_KEEPALIVE_INTERVAL,
};
pub use quic::{client_endpoint, open_stream, resolve, server_endpoint, QuicError, ALPN};
pub use tls::{ServerTrust, TlsError, TlsIdentity};
