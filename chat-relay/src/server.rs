//! Main ChatRelay state shared by every stream handler.
//!
//! ChatRelay owns the client directory and the federation link, and decides
//! where LIST answers and direct messages come from and go to.

use std::sync::atomic::{AtomicU64, Ordering};

use chat_types::{join_nicknames, DirectMessage};

use crate::config::Config;
use crate::directory::Directory;
use crate::error::{FederationError, FederationResult};
use crate::federation::{DialSettings, FederationLink};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total QUIC sessions accepted.
    pub connections_total: AtomicU64,
    /// Total streams accepted across all sessions.
    pub streams_total: AtomicU64,
    /// Streams that authenticated as a client.
    pub clients_authenticated: AtomicU64,
    /// Streams that authenticated as the partner server.
    pub peers_authenticated: AtomicU64,
    /// Streams closed for a bad secret or a PDU before CONNECT.
    pub auth_failures: AtomicU64,
    /// Federated LIST requests answered or attempted.
    pub list_requests: AtomicU64,
    /// DMs written to a local recipient.
    pub dms_delivered: AtomicU64,
    /// DMs forwarded over the federation link.
    pub dms_forwarded: AtomicU64,
    /// DMs that reached nobody.
    pub dms_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Log every counter at info level.
    pub fn log_summary(&self) {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        tracing::info!(
            "Relay metrics: connections={} streams={} clients={} peers={} auth_failures={} lists={} delivered={} forwarded={} dropped={}",
            get(&self.connections_total),
            get(&self.streams_total),
            get(&self.clients_authenticated),
            get(&self.peers_authenticated),
            get(&self.auth_failures),
            get(&self.list_requests),
            get(&self.dms_delivered),
            get(&self.dms_forwarded),
            get(&self.dms_dropped),
        );
    }
}

/// Which kind of authenticated stream a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A chat client.
    Client,
    /// The partner server's federation link.
    Peer,
}

/// Where a direct message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Written to a local recipient's stream.
    Delivered,
    /// Sent to the partner server.
    Forwarded,
    /// Reached nobody.
    Dropped,
}

/// Main relay state.
pub struct ChatRelay {
    config: Config,
    directory: Directory,
    federation: FederationLink,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("server_name", &self.config.server.server_name)
            .field("clients", &self.directory.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ChatRelay {
    /// Create a relay with an empty directory and an unconnected link.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            directory: Directory::new(),
            federation: FederationLink::new(),
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the client directory.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Get the federation link.
    pub fn federation(&self) -> &FederationLink {
        &self.federation
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Whether `secret` matches the configured shared secret.
    pub fn check_secret(&self, secret: &str) -> bool {
        secret == self.config.server.secret
    }

    /// What the federation dialer announces, from config.
    pub fn dial_settings(&self) -> DialSettings {
        DialSettings {
            server_name: self.config.server.server_name.clone(),
            secret: self.config.server.secret.clone(),
            retry_backoff: self.config.retry_backoff(),
            keepalive_interval: self.config.keepalive_interval(),
        }
    }

    /// Local nicknames, comma-joined.
    pub fn local_nicknames(&self) -> String {
        join_nicknames(self.directory.nicknames())
    }

    /// Local nicknames followed by the partner's, comma-joined.
    ///
    /// Local-only while the federation link is not connected. Fails when
    /// the partner exchange fails; the link is then dead.
    pub async fn list_nicknames(&self) -> FederationResult<String> {
        self.metrics.list_requests.fetch_add(1, Ordering::Relaxed);

        let local = self.directory.nicknames();
        let remote = match self.federation.query_nicknames().await {
            Ok(names) => names,
            Err(FederationError::NotConnected) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(join_nicknames(local.iter().chain(remote.iter())))
    }

    /// Deliver `dm` locally, or forward it to the partner.
    ///
    /// DMs from the partner for unknown recipients are dropped, so a
    /// message bounces at most once between the pair.
    pub async fn route_direct_message(&self, dm: &DirectMessage, origin: Origin) -> Route {
        let route = match self.directory.lookup(&dm.recipient) {
            Some(recipient) => match recipient.send(&dm.delivery().to_pdu()).await {
                Ok(()) => {
                    tracing::debug!("DM {} -> {} delivered", dm.sender, dm.recipient);
                    Route::Delivered
                }
                Err(e) => {
                    tracing::warn!("DM {} -> {} write failed: {}", dm.sender, dm.recipient, e);
                    Route::Dropped
                }
            },
            None if origin == Origin::Peer => {
                tracing::debug!(
                    "DM {} -> {} from partner dropped: recipient unknown here",
                    dm.sender,
                    dm.recipient
                );
                Route::Dropped
            }
            None => match self.federation.forward(dm).await {
                Ok(()) => {
                    tracing::debug!("DM {} -> {} forwarded to partner", dm.sender, dm.recipient);
                    Route::Forwarded
                }
                Err(e) => {
                    tracing::info!("DM {} -> {} dropped: {}", dm.sender, dm.recipient, e);
                    Route::Dropped
                }
            },
        };

        let counter = match route {
            Route::Delivered => &self.metrics.dms_delivered,
            Route::Forwarded => &self.metrics.dms_forwarded,
            Route::Dropped => &self.metrics.dms_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        route
    }
}
