//! # chat-relay
//!
//! Federated chat relay server for quicchat.
//!
//! This crate implements a relay server that:
//! - Accepts QUIC sessions from chat clients and from one partner relay
//! - Authenticates every stream against a shared secret
//! - Keeps an in-memory directory of connected nicknames
//! - Delivers direct messages locally, or forwards them to the partner
//!
//! ## Architecture
//!
//! ```text
//! alice ──┐                              ┌── carol
//!         │  QUIC                  QUIC  │
//!     ┌───┴─────────┐  federation  ┌─────┴───────┐
//!     │  relay :4242 │◄───────────►│ relay :4243 │
//!     │  directory   │   link      │  directory  │
//!     └───┬─────────┘              └─────────────┘
//! bob ────┘
//! ```
//!
//! ## Protocol
//!
//! Every stream starts with CONNECT and is then served by a
//! [`handler::StreamHandler`]:
//! - CLIENT_CONNECT / PEER_CONNECT → DATA|ACK (authenticate)
//! - LIST → DATA (local + partner nicknames)
//! - PEER_LIST → DATA (local nicknames)
//! - DM → DATA to the recipient, or DM to the partner
//! - PING (no reply)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod directory;
pub mod error;
pub mod federation;
pub mod handler;
pub mod listener;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use error::{FederationError, ProtocolError, RelayError};
pub use federation::{FederationLink, MockDialer, PeerDialer, PeerStream, QuicDialer};
pub use handler::StreamHandler;
pub use listener::RelayServer;
pub use server::{ChatRelay, Origin, RelayMetrics, Route};
