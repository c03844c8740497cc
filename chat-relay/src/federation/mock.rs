//! Mock dialer for testing.
//!
//! Each successful dial creates an in-memory pipe; the far end is handed to
//! the test so it can play the partner server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_core::PduIoError;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::{PeerDialer, PeerStream};
use crate::error::FederationResult;

const PIPE_CAPACITY: usize = 128 * 1024;

/// Mock dialer for testing.
#[derive(Debug, Clone)]
pub struct MockDialer {
    inner: Arc<Mutex<MockDialerInner>>,
    partners: mpsc::UnboundedSender<DuplexStream>,
}

#[derive(Debug, Default)]
struct MockDialerInner {
    attempts: usize,
    fail_next: usize,
}

impl MockDialer {
    /// Create a mock dialer and the receiver of partner-side pipe ends.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (partners, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            inner: Arc::new(Mutex::new(MockDialerInner::default())),
            partners,
        };
        (dialer, rx)
    }

    /// Cause the next `count` dials to fail.
    pub fn fail_next_dials(&self, count: usize) {
        let mut inner = self.lock();
        inner.fail_next = count;
    }

    /// Number of dial attempts so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockDialerInner> {
        // A panic while holding this lock already failed the test.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerDialer for MockDialer {
    async fn dial(&self) -> FederationResult<PeerStream> {
        {
            let mut inner = self.lock();
            inner.attempts += 1;
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                let refused = std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock dial refused",
                );
                return Err(PduIoError::Io(refused).into());
            }
        }

        let (local, partner) = tokio::io::duplex(PIPE_CAPACITY);
        if self.partners.send(partner).is_err() {
            let gone = std::io::Error::new(std::io::ErrorKind::NotConnected, "no partner");
            return Err(PduIoError::Io(gone).into());
        }
        let (reader, writer) = tokio::io::split(local);
        Ok(PeerStream::new(reader, writer))
    }

    fn peer(&self) -> &str {
        "mock-partner"
    }
}
