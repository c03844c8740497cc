//! Federation link to the partner server.
//!
//! A relay keeps at most one outbound stream to its partner. It is dialed
//! once at startup, retried until it succeeds, and never re-dialed after
//! that. Once published it carries:
//!
//! - PEER_LIST requests, one in flight at a time, for federated LIST
//! - DMs for recipients this relay does not know
//! - keepalive PINGs
//!
//! A failed keepalive write or a failed federated read marks the link dead;
//! from then on the relay behaves as if it had never connected.
//!
//! ```text
//!  relay A                               relay B
//!  ┌──────────────┐  PEER_CONNECT a|s    ┌──────────────┐
//!  │ FederationLink├────────────────────►│ StreamHandler│ (Peer)
//!  │              │◄──── DATA|ACK "a" ───┤              │
//!  │              ├──── PEER_LIST ──────►│              │
//!  │              │◄──── DATA "x,y" ─────┤              │
//!  └──────────────┘                      └──────────────┘
//! ```

mod dialer;
mod mock;

pub use dialer::{PeerDialer, PeerStream, QuicDialer};
pub use mock::MockDialer;

use std::sync::{Arc, Weak};
use std::time::Duration;

use chat_core::{read_pdu, spawn_keepalive, PduWriter};
use chat_types::{split_nicknames, ConnectRequest, DirectMessage, Pdu, PduType};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{FederationError, FederationResult};
use dialer::{BoxedReader, QuicSession};

/// Floor for the pause between failed dials.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// What the dialer announces and how it paces itself.
#[derive(Debug, Clone)]
pub struct DialSettings {
    /// Server name sent in PEER_CONNECT.
    pub server_name: String,
    /// Shared secret sent in PEER_CONNECT.
    pub secret: String,
    /// Delay between failed attempts.
    pub retry_backoff: Duration,
    /// Interval between keepalive PINGs once connected.
    pub keepalive_interval: Duration,
}

/// Shared handle to the federation link.
///
/// Clones refer to the same link.
#[derive(Clone, Default)]
pub struct FederationLink {
    active: Arc<RwLock<Option<Arc<ActiveLink>>>>,
}

struct ActiveLink {
    peer: String,
    writer: PduWriter,
    /// Held for a whole PEER_LIST exchange.
    reader: Mutex<BoxedReader>,
    keepalive: AbortHandle,
    session: Option<QuicSession>,
}

impl FederationLink {
    /// A link that has not connected yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live link is published.
    pub async fn is_connected(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Address of the connected partner.
    pub async fn peer(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|link| link.peer.clone())
    }

    /// Publish an authenticated stream and start its keepalive.
    pub async fn attach(&self, peer: &str, stream: PeerStream, keepalive_interval: Duration) {
        let keepalive = spawn_keepalive(stream.writer.clone(), keepalive_interval);
        let active = Arc::new(ActiveLink {
            peer: peer.to_string(),
            writer: stream.writer,
            reader: Mutex::new(stream.reader),
            keepalive: keepalive.abort_handle(),
            session: stream.session,
        });

        *self.active.write().await = Some(active.clone());
        tracing::info!("Federation link to {} established", peer);

        self.supervise(keepalive, Arc::downgrade(&active));
    }

    /// Ask the partner for its local nicknames.
    ///
    /// On failure the link is marked dead.
    pub async fn query_nicknames(&self) -> FederationResult<Vec<String>> {
        let active = self.current().await.ok_or(FederationError::NotConnected)?;

        let result = active.exchange_peer_list().await;
        if let Err(e) = &result {
            self.mark_dead(&active, &e.to_string()).await;
        }
        result
    }

    /// Send a DM to the partner unchanged.
    ///
    /// On failure the link is marked dead.
    pub async fn forward(&self, dm: &DirectMessage) -> FederationResult<()> {
        let active = self.current().await.ok_or(FederationError::NotConnected)?;

        if let Err(e) = active.writer.send(&dm.to_pdu()).await {
            let err = FederationError::from(e);
            self.mark_dead(&active, &err.to_string()).await;
            return Err(err);
        }
        Ok(())
    }

    /// Dial until a stream is authenticated, then publish it.
    ///
    /// Retries forever with a fixed backoff of at least
    /// [`MIN_RETRY_BACKOFF`]. Returns
    /// [`FederationError::Cancelled`] once `shutdown` becomes true or its
    /// sender is dropped.
    pub async fn establish(
        &self,
        dialer: Arc<dyn PeerDialer>,
        settings: DialSettings,
        mut shutdown: watch::Receiver<bool>,
    ) -> FederationResult<()> {
        let backoff = settings.retry_backoff.max(MIN_RETRY_BACKOFF);
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return Err(FederationError::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                result = handshake(dialer.as_ref(), &settings) => result,
                _ = shutdown.changed() => return Err(FederationError::Cancelled),
            };

            match outcome {
                Ok(stream) => {
                    self.attach(dialer.peer(), stream, settings.keepalive_interval)
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Federation dial to {} failed (attempt {}): {}; retrying in {:?}",
                        dialer.peer(),
                        attempt,
                        e,
                        backoff
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return Err(FederationError::Cancelled),
            }
        }
    }

    async fn current(&self) -> Option<Arc<ActiveLink>> {
        self.active.read().await.clone()
    }

    async fn mark_dead(&self, target: &Arc<ActiveLink>, reason: &str) {
        let mut slot = self.active.write().await;
        let is_current = matches!(&*slot, Some(current) if Arc::ptr_eq(current, target));
        if !is_current {
            return;
        }
        *slot = None;
        drop(slot);

        target.keepalive.abort();
        if let Some(session) = &target.session {
            session.close();
        }
        tracing::warn!("Federation link to {} marked dead: {}", target.peer, reason);
    }

    fn supervise(
        &self,
        keepalive: JoinHandle<chat_core::KeepaliveStopped>,
        target: Weak<ActiveLink>,
    ) {
        let link = self.clone();
        tokio::spawn(async move {
            let reason = match keepalive.await {
                Ok(stopped) => stopped.to_string(),
                Err(e) if e.is_cancelled() => return,
                Err(e) => format!("keepalive task failed: {e}"),
            };
            if let Some(target) = target.upgrade() {
                link.mark_dead(&target, &reason).await;
            }
        });
    }
}

impl std::fmt::Debug for FederationLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationLink").finish_non_exhaustive()
    }
}

impl ActiveLink {
    async fn exchange_peer_list(&self) -> FederationResult<Vec<String>> {
        let mut reader = self.reader.lock().await;
        self.writer.send(&Pdu::empty(PduType::PEER_LIST)).await?;

        let reply = read_pdu(&mut *reader)
            .await?
            .ok_or(FederationError::Closed)?;
        Ok(split_nicknames(&reply.payload_lossy()))
    }
}

/// Spawn [`FederationLink::establish`] as a background task.
pub fn spawn_dialer(
    link: FederationLink,
    dialer: Arc<dyn PeerDialer>,
    settings: DialSettings,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<FederationResult<()>> {
    tokio::spawn(async move {
        tracing::info!("Federation dialer started (partner: {})", dialer.peer());
        link.establish(dialer, settings, shutdown).await
    })
}

async fn handshake(
    dialer: &dyn PeerDialer,
    settings: &DialSettings,
) -> FederationResult<PeerStream> {
    let mut stream = dialer.dial().await?;

    let hello = ConnectRequest::new(&settings.server_name, &settings.secret);
    stream.writer.send(&hello.to_pdu(PduType::PEER_CONNECT)).await?;

    match read_pdu(&mut stream.reader).await? {
        Some(reply) if reply.kind.is_ack() => {
            tracing::debug!(
                "Partner {} acknowledged us as {}",
                dialer.peer(),
                reply.payload_lossy()
            );
            Ok(stream)
        }
        Some(reply) => Err(FederationError::UnexpectedReply(reply.kind)),
        None => Err(FederationError::Rejected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::PduIoError;
    use tokio::io::{AsyncRead, DuplexStream, ReadHalf, WriteHalf};

    fn settings() -> DialSettings {
        DialSettings {
            server_name: "east".into(),
            secret: "password123".into(),
            retry_backoff: Duration::from_millis(10),
            keepalive_interval: Duration::from_secs(3600),
        }
    }

    struct Partner {
        reader: ReadHalf<DuplexStream>,
        writer: PduWriter,
    }

    impl Partner {
        fn new(pipe: DuplexStream) -> Self {
            let (reader, writer): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) =
                tokio::io::split(pipe);
            Self {
                reader,
                writer: PduWriter::new(writer),
            }
        }

        /// Next PDU that is not a keepalive PING.
        async fn next(&mut self) -> Option<Pdu> {
            next_non_ping(&mut self.reader).await
        }
    }

    async fn next_non_ping<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Pdu> {
        loop {
            match read_pdu(reader).await.ok()? {
                Some(pdu) if pdu.kind == PduType::PING => continue,
                other => return other,
            }
        }
    }

    async fn attached_link() -> (FederationLink, Partner) {
        let (dialer, mut partners) = MockDialer::new();
        let stream = dialer.dial().await.unwrap();
        let link = FederationLink::new();
        link.attach("mock-partner", stream, Duration::from_secs(3600))
            .await;

        let mut partner = Partner::new(partners.recv().await.unwrap());
        let first = read_pdu(&mut partner.reader).await.unwrap().unwrap();
        assert_eq!(first, Pdu::empty(PduType::PING));
        (link, partner)
    }

    #[tokio::test]
    async fn unconnected_link_reports_not_connected() {
        let link = FederationLink::new();
        assert!(!link.is_connected().await);
        assert!(matches!(
            link.query_nicknames().await,
            Err(FederationError::NotConnected)
        ));
        let dm = DirectMessage::new("bob", "hi", "alice");
        assert!(matches!(
            link.forward(&dm).await,
            Err(FederationError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn query_sends_peer_list_and_splits_reply() {
        let (link, mut partner) = attached_link().await;
        assert_eq!(link.peer().await.as_deref(), Some("mock-partner"));

        let query = tokio::spawn({
            let link = link.clone();
            async move { link.query_nicknames().await }
        });

        let request = partner.next().await.unwrap();
        assert_eq!(request, Pdu::empty(PduType::PEER_LIST));
        partner
            .writer
            .send(&Pdu::text(PduType::DATA, "carol,dave"))
            .await
            .unwrap();

        assert_eq!(query.await.unwrap().unwrap(), vec!["carol", "dave"]);
        assert!(link.is_connected().await);
    }

    #[tokio::test]
    async fn empty_partner_directory_yields_no_names() {
        let (link, mut partner) = attached_link().await;
        let query = tokio::spawn({
            let link = link.clone();
            async move { link.query_nicknames().await }
        });
        partner.next().await.unwrap();
        partner.writer.send(&Pdu::empty(PduType::DATA)).await.unwrap();

        assert!(query.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_query_marks_link_dead() {
        let (link, partner) = attached_link().await;
        drop(partner);

        let err = link.query_nicknames().await.unwrap_err();
        assert!(matches!(
            err,
            FederationError::Closed | FederationError::Stream(_)
        ));
        assert!(!link.is_connected().await);
        assert!(matches!(
            link.query_nicknames().await,
            Err(FederationError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn forward_writes_dm_unchanged() {
        let (link, mut partner) = attached_link().await;
        let dm = DirectMessage::parse("carol|hi | there|alice").unwrap();

        link.forward(&dm).await.unwrap();

        let pdu = partner.next().await.unwrap();
        assert_eq!(pdu.kind, PduType::DM);
        assert_eq!(pdu.payload, b"carol|hi | there|alice");
    }

    #[tokio::test]
    async fn keepalive_failure_marks_link_dead() {
        let (dialer, mut partners) = MockDialer::new();
        let stream = dialer.dial().await.unwrap();
        let link = FederationLink::new();
        link.attach("mock-partner", stream, Duration::from_millis(10))
            .await;

        let partner = partners.recv().await.unwrap();
        drop(partner);

        tokio::time::timeout(Duration::from_secs(2), async {
            while link.is_connected().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("link should be marked dead after keepalive fails");
    }

    #[tokio::test]
    async fn establish_retries_then_publishes() {
        let (dialer, mut partners) = MockDialer::new();
        dialer.fail_next_dials(2);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let link = FederationLink::new();

        let task = spawn_dialer(
            link.clone(),
            Arc::new(dialer.clone()),
            settings(),
            shutdown,
        );

        let mut partner = Partner::new(partners.recv().await.unwrap());
        let hello = partner.next().await.unwrap();
        assert_eq!(hello.kind, PduType::PEER_CONNECT);
        assert_eq!(hello.payload, b"east|password123");
        partner
            .writer
            .send(&Pdu::text(PduType::DATA | PduType::ACK, "east"))
            .await
            .unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(dialer.attempts(), 3);
        assert!(link.is_connected().await);
    }

    #[tokio::test]
    async fn rejected_handshake_is_retried() {
        let (dialer, mut partners) = MockDialer::new();
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let link = FederationLink::new();
        let task = spawn_dialer(
            link.clone(),
            Arc::new(dialer.clone()),
            settings(),
            shutdown,
        );

        // First partner closes without acknowledging.
        let mut first = Partner::new(partners.recv().await.unwrap());
        first.next().await.unwrap();
        first.writer.shutdown().await.unwrap();

        let mut second = Partner::new(partners.recv().await.unwrap());
        second.next().await.unwrap();
        second
            .writer
            .send(&Pdu::text(PduType::DATA | PduType::ACK, "east"))
            .await
            .unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(dialer.attempts(), 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_retry_loop() {
        let (dialer, _partners) = MockDialer::new();
        dialer.fail_next_dials(usize::MAX);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let link = FederationLink::new();

        let mut slow = settings();
        slow.retry_backoff = Duration::from_secs(3600);
        let task = spawn_dialer(link.clone(), Arc::new(dialer.clone()), slow, shutdown);

        while dialer.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dialer should stop promptly")
            .unwrap();
        assert!(matches!(result, Err(FederationError::Cancelled)));
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn zero_backoff_still_pauses_between_dials() {
        let (dialer, _partners) = MockDialer::new();
        dialer.fail_next_dials(usize::MAX);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let link = FederationLink::new();

        let mut eager = settings();
        eager.retry_backoff = Duration::ZERO;
        let task = spawn_dialer(link, Arc::new(dialer.clone()), eager, shutdown);

        tokio::time::sleep(MIN_RETRY_BACKOFF * 5).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap_err();

        let attempts = dialer.attempts();
        assert!(attempts >= 1);
        assert!(attempts <= 10, "dialed {attempts} times without pausing");
    }

    #[tokio::test]
    async fn dial_errors_convert() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = FederationError::from(PduIoError::Io(io));
        assert!(err.to_string().starts_with("stream error"));
    }
}
