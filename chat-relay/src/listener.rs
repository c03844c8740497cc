//! Relay server: QUIC listener plus the federation dialer.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chat_core::{server_endpoint, TlsIdentity};
use quinn::{Endpoint, Incoming};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::Result;
use crate::federation::{spawn_dialer, PeerDialer, QuicDialer};
use crate::server::ChatRelay;
use crate::session::Session;

/// A bound relay, ready to run.
pub struct RelayServer {
    relay: Arc<ChatRelay>,
    endpoint: Endpoint,
    dialer: Option<Arc<dyn PeerDialer>>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("relay", &self.relay)
            .field("local_addr", &self.endpoint.local_addr().ok())
            .field("federation", &self.dialer.as_ref().map(|d| d.peer().to_string()))
            .finish()
    }
}

impl RelayServer {
    /// Bind using the certificate described by `config.tls`.
    pub fn bind(config: Config) -> Result<Self> {
        let identity = config.tls.identity()?;
        Self::bind_with_identity(config, &identity)
    }

    /// Bind presenting `identity`.
    ///
    /// When federation is enabled the partner is dialed over QUIC once
    /// [`run_until`](Self::run_until) starts.
    pub fn bind_with_identity(config: Config, identity: &TlsIdentity) -> Result<Self> {
        config.validate()?;
        let bind = config.bind_addr()?;
        let endpoint = server_endpoint(bind, identity)?;

        let dialer: Option<Arc<dyn PeerDialer>> = if config.federation.enabled {
            Some(Arc::new(QuicDialer::new(
                &config.peer_address(),
                &config.federation.peer_server_name,
                config.peer_trust()?,
            )))
        } else {
            None
        };

        tracing::info!("Relay listening on {}", endpoint.local_addr()?);
        Ok(Self {
            relay: Arc::new(ChatRelay::new(config)),
            endpoint,
            dialer,
        })
    }

    /// Dial the partner with `dialer` instead of the configured address.
    pub fn with_dialer(mut self, dialer: Arc<dyn PeerDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Do not dial a partner.
    pub fn without_federation(mut self) -> Self {
        self.dialer = None;
        self
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Shared relay state.
    pub fn relay(&self) -> Arc<ChatRelay> {
        self.relay.clone()
    }

    /// Serve until `shutdown` resolves or the endpoint is closed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            relay,
            endpoint,
            dialer,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        let federation = dialer.map(|dialer| {
            spawn_dialer(
                relay.federation().clone(),
                dialer,
                relay.dial_settings(),
                stop_rx,
            )
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                incoming = endpoint.accept() => match incoming {
                    Some(incoming) => accept(relay.clone(), incoming),
                    None => break,
                },
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        if let Some(task) = federation {
            if let Ok(Err(e)) = task.await {
                tracing::debug!("Federation dialer stopped: {}", e);
            }
        }

        endpoint.close(0u32.into(), b"server shutting down");
        endpoint.wait_idle().await;
        relay.metrics().log_summary();
        Ok(())
    }
}

fn accept(relay: Arc<ChatRelay>, incoming: Incoming) {
    tokio::spawn(async move {
        let connection = match incoming.await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::debug!("Handshake failed: {}", e);
                return;
            }
        };

        relay
            .metrics()
            .connections_total
            .fetch_add(1, Ordering::Relaxed);
        Session::new(relay, connection).run().await;
    });
}
