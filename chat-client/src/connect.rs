//! Connecting to a relay over QUIC.

use std::time::Duration;

use chat_core::{
    client_endpoint, open_stream, resolve, PduWriter, ServerTrust, DEFAULT_KEEPALIVE_INTERVAL,
};
use quinn::{Connection, Endpoint, RecvStream};
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

use crate::agent::{ClientAgent, ClientEvent, SessionEnd};
use crate::error::Result;

/// Where to connect and who to be.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Relay address, `host:port`.
    pub server: String,
    /// TLS server name expected in the relay's certificate.
    pub server_name: String,
    /// How to authenticate the relay.
    pub trust: ServerTrust,
    /// Requested nickname.
    pub nickname: String,
    /// Shared secret.
    pub secret: String,
    /// Interval between keepalive PINGs.
    pub keepalive_interval: Duration,
}

impl ConnectOptions {
    /// Options for `nickname` on `server` with the defaults used by the
    /// local demo pair.
    pub fn new(server: &str, nickname: &str, secret: &str) -> Self {
        Self {
            server: server.to_string(),
            server_name: "localhost".to_string(),
            trust: ServerTrust::AcceptAny,
            nickname: nickname.to_string(),
            secret: secret.to_string(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// An authenticated agent together with the QUIC session carrying it.
pub struct QuicClient {
    agent: ClientAgent<RecvStream>,
    endpoint: Endpoint,
    connection: Connection,
}

impl QuicClient {
    /// Nickname acknowledged by the server.
    pub fn nickname(&self) -> &str {
        self.agent.nickname()
    }

    /// Run the agent, then close the session.
    pub async fn run<I>(
        self,
        input: I,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<SessionEnd>
    where
        I: AsyncBufRead + Unpin,
    {
        let outcome = self.agent.run(input, events).await;

        self.connection.close(0u32.into(), b"bye");
        self.endpoint.wait_idle().await;
        outcome
    }
}

/// Dial the relay, open the session's stream and authenticate.
pub async fn connect(options: &ConnectOptions) -> Result<QuicClient> {
    let remote = resolve(&options.server).await?;
    let endpoint = client_endpoint(remote, &options.trust)?;
    let (connection, send, recv) = open_stream(&endpoint, remote, &options.server_name).await?;
    tracing::info!("Connected to {}", remote);

    let agent = ClientAgent::login(
        recv,
        PduWriter::new(send),
        &options.nickname,
        &options.secret,
    )
    .await?
    .with_keepalive_interval(options.keepalive_interval);

    Ok(QuicClient {
        agent,
        endpoint,
        connection,
    })
}
