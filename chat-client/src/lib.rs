//! # chat-client
//!
//! Client agent for quicchat relays.
//!
//! The agent authenticates on one stream, then runs a receive loop, a
//! keepalive task and a command loop fed from any line-oriented input.
//! Everything worth showing is sent to an event channel, so the agent has
//! no opinion about terminals.
//!
//! ```text
//! stdin ──► command loop ──┐
//!                          ├──► PduWriter ──► relay
//!           keepalive ─────┘
//! relay ──► receive loop ──► ClientEvent channel ──► console
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod command;
pub mod connect;
pub mod error;

pub use agent::{away_reply, ClientAgent, ClientEvent, SessionEnd, AWAY_NOTICE};
pub use command::Command;
pub use connect::{connect, ConnectOptions, QuicClient};
pub use error::ClientError;
