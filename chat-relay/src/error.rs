//! Error types for quicchat-relay.

use chat_core::{PduIoError, QuicError, TlsError};
use chat_types::PduType;

/// Main error type for relay startup and the listener.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Certificate provisioning error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// QUIC endpoint error.
    #[error("QUIC error: {0}")]
    Quic(#[from] QuicError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a single stream handler.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Bad secret or malformed CONNECT payload.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A PDU other than CONNECT arrived before authentication.
    #[error("stream not authenticated: got {received} before CONNECT")]
    NotAuthenticated {
        /// Type of the offending PDU.
        received: PduType,
    },

    /// Reading or writing the stream failed.
    #[error("stream error: {0}")]
    Stream(#[from] PduIoError),
}

impl ProtocolError {
    /// Whether the handler ended because the peer failed to authenticate.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::NotAuthenticated { .. }
        )
    }
}

/// Federation link errors.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// No live link to the partner.
    #[error("federation link not connected")]
    NotConnected,

    /// Dialing the partner failed.
    #[error("dial failed: {0}")]
    Dial(#[from] QuicError),

    /// The partner closed the stream instead of acknowledging PEER_CONNECT.
    #[error("partner rejected PEER_CONNECT")]
    Rejected,

    /// The partner answered PEER_CONNECT with something other than an ACK.
    #[error("unexpected reply to PEER_CONNECT: {0}")]
    UnexpectedReply(PduType),

    /// The partner closed the link mid-request.
    #[error("partner closed the federation stream")]
    Closed,

    /// Reading or writing the link failed.
    #[error("stream error: {0}")]
    Stream(#[from] PduIoError),

    /// Shutdown was requested while dialing.
    #[error("federation dialer cancelled")]
    Cancelled,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for stream handler operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for federation operations.
pub type FederationResult<T> = std::result::Result<T, FederationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert!(ProtocolError::AuthenticationFailed.is_auth_failure());
        assert!(ProtocolError::NotAuthenticated {
            received: PduType::LIST
        }
        .is_auth_failure());

        let io = PduIoError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!ProtocolError::Stream(io).is_auth_failure());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::NotAuthenticated {
            received: PduType::LIST,
        };
        assert_eq!(err.to_string(), "stream not authenticated: got LIST before CONNECT");

        let err = FederationError::UnexpectedReply(PduType::DATA);
        assert_eq!(err.to_string(), "unexpected reply to PEER_CONNECT: DATA");
    }
}
