//! Client error types.

use chat_core::{PduIoError, QuicError};
use chat_types::PduType;
use thiserror::Error;

/// Errors from connecting or running a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server closed the stream instead of acknowledging CONNECT.
    #[error("authentication rejected: {reason}")]
    AuthenticationRejected {
        /// What the client observed.
        reason: String,
    },

    /// The server answered CONNECT with something other than an ACK.
    #[error("unexpected reply to CONNECT: {0}")]
    UnexpectedReply(PduType),

    /// Reading or writing the server stream failed.
    #[error("stream error: {0}")]
    Stream(#[from] PduIoError),

    /// Reading user input failed.
    #[error("input error: {0}")]
    Input(#[from] std::io::Error),

    /// Dialing the server failed.
    #[error("connection error: {0}")]
    Quic(#[from] QuicError),

    /// A background task panicked.
    #[error("task failed: {0}")]
    Task(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
