//! Keepalive task.
//!
//! Sends an empty PING on a stream immediately and then once per interval.
//! Never reads. Stops on the first failed write and reports it through the
//! task's join handle so the owner can tear the stream down.

use std::time::Duration;

use chat_types::{Pdu, PduType};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::io::{PduIoError, PduWriter};

/// Interval between PINGs.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Shortest interval a keepalive task will tick at.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Why a keepalive task ended.
#[derive(Debug, Error)]
#[error("keepalive stopped after {pings_sent} pings: {source}")]
pub struct KeepaliveStopped {
    /// PINGs written before the failure.
    pub pings_sent: u64,
    /// The failed write.
    #[source]
    pub source: PduIoError,
}

/// Spawn a keepalive task bound to `writer`.
///
/// `every` is raised to [`MIN_KEEPALIVE_INTERVAL`] if shorter.
pub fn spawn_keepalive(writer: PduWriter, every: Duration) -> JoinHandle<KeepaliveStopped> {
    let every = every.max(MIN_KEEPALIVE_INTERVAL);
    tokio::spawn(async move {
        let ping = Pdu::empty(PduType::PING);
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pings_sent = 0u64;

        loop {
            timer.tick().await;

            if let Err(source) = writer.send(&ping).await {
                tracing::debug!("Keepalive stopped after {} pings: {}", pings_sent, source);
                return KeepaliveStopped { pings_sent, source };
            }
            pings_sent += 1;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_pdu;

    #[tokio::test]
    async fn sends_ping_immediately_and_periodically() {
        let (tx, mut rx) = tokio::io::duplex(256);
        let handle = spawn_keepalive(PduWriter::new(tx), Duration::from_millis(10));

        for _ in 0..3 {
            let pdu = read_pdu(&mut rx).await.unwrap().unwrap();
            assert_eq!(pdu, Pdu::empty(PduType::PING));
        }

        handle.abort();
    }

    #[tokio::test]
    async fn zero_interval_runs_instead_of_panicking() {
        let (tx, mut rx) = tokio::io::duplex(256);
        let handle = spawn_keepalive(PduWriter::new(tx), Duration::ZERO);

        for _ in 0..2 {
            let pdu = read_pdu(&mut rx).await.unwrap().unwrap();
            assert_eq!(pdu, Pdu::empty(PduType::PING));
        }

        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn stops_within_one_interval_after_stream_closes() {
        let every = Duration::from_millis(20);
        let (tx, mut rx) = tokio::io::duplex(256);
        let handle = spawn_keepalive(PduWriter::new(tx), every);

        // First ping arrives, then the peer goes away.
        read_pdu(&mut rx).await.unwrap().unwrap();
        drop(rx);

        let stopped = tokio::time::timeout(every * 5, handle)
            .await
            .expect("keepalive should stop after a failed write")
            .expect("keepalive task should not panic");
        assert!(stopped.pings_sent >= 1);
        assert!(matches!(stopped.source, PduIoError::Io(_)));
    }
}
