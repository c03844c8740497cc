//! # chat-types
//!
//! Wire format types for the quicchat relay protocol.
//!
//! This crate provides the foundational types used across all quicchat crates:
//! - [`Pdu`], [`PduType`] - The fixed-header binary message unit and its type codes
//! - [`ConnectRequest`], [`DirectMessage`], [`Delivery`] - Pipe-delimited payload records
//! - [`PduError`], [`PayloadError`] - Error types
//!
//! ## Wire format
//!
//! ```text
//! +--------+----------------------+---------------------+
//! | type:1 | length:4 (u32, BE)   | payload: length     |
//! +--------+----------------------+---------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod payload;
mod pdu;

pub use error::{PayloadError, PduError};
pub use payload::{join_nicknames, split_nicknames, ConnectRequest, Delivery, DirectMessage};
pub use pdu::{
    decode, decode_prefix, encode, parse_header, Pdu, PduType, HEADER_LEN, MAX_PAYLOAD_LEN,
    PDU_BUFFER_SIZE,
};
