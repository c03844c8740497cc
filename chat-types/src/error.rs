//! Error types for quicchat wire handling.

use thiserror::Error;

/// Framing errors raised while encoding or decoding a PDU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    /// Buffer is smaller than the fixed header.
    #[error("truncated header: {available} bytes, need {required}")]
    TruncatedHeader {
        /// Bytes available.
        available: usize,
        /// Header size.
        required: usize,
    },

    /// Declared length exceeds the bytes actually received.
    #[error("truncated payload: declared {declared} bytes, only {available} available")]
    TruncatedPayload {
        /// Length from the header.
        declared: usize,
        /// Payload bytes present in the buffer.
        available: usize,
    },

    /// Declared length exceeds the receive buffer capacity.
    #[error("oversized frame: declared {declared} bytes (limit: {limit})")]
    Oversized {
        /// Length from the header.
        declared: usize,
        /// Maximum payload length.
        limit: usize,
    },

    /// Payload cannot be represented in the length field.
    #[error("payload too large: {size} bytes (limit: {limit})")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Maximum payload length.
        limit: usize,
    },
}

/// Errors raised while interpreting a PDU payload as a structured record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Payload does not have the expected pipe-delimited fields.
    #[error("malformed {record} payload: expected {expected}")]
    Malformed {
        /// Record being parsed.
        record: &'static str,
        /// Expected layout.
        expected: &'static str,
    },
}
