//! Client agent.
//!
//! After authenticating, an agent runs three things side by side:
//!
//! - a receive loop that turns every incoming PDU into a [`ClientEvent`]
//!   and, while away, answers deliveries with [`AWAY_NOTICE`]
//! - a keepalive task pinging the server
//! - the command loop reading user input
//!
//! Whichever finishes first ends the session; the others are stopped and the
//! stream is shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_core::{
    read_pdu, spawn_keepalive, KeepaliveStopped, PduIoError, PduWriter, DEFAULT_KEEPALIVE_INTERVAL,
};
use chat_types::{ConnectRequest, Delivery, DirectMessage, Pdu, PduType};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead};
use tokio::sync::mpsc;

use crate::command::Command;
use crate::error::{ClientError, Result};

/// Auto-reply sent while away.
pub const AWAY_NOTICE: &str = "I am away";

/// Something for the console to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Payload of a PDU from the server.
    Message(String),
    /// Local status text.
    Notice(String),
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The user typed `exit`.
    Exit,
    /// User input reached end of file.
    InputClosed,
    /// The server closed the stream.
    ServerClosed,
    /// A keepalive write failed.
    KeepaliveStopped(KeepaliveStopped),
}

/// An authenticated client session.
pub struct ClientAgent<R> {
    reader: R,
    writer: PduWriter,
    nickname: String,
    keepalive_interval: Duration,
}

impl<R> ClientAgent<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    /// Send CONNECT and wait for the server's ACK.
    ///
    /// The nickname the server echoes back is the one used as sender for
    /// outgoing DMs.
    pub async fn login(
        mut reader: R,
        writer: PduWriter,
        nickname: &str,
        secret: &str,
    ) -> Result<Self> {
        let request = ConnectRequest::new(nickname, secret);
        writer.send(&request.to_pdu(PduType::CLIENT_CONNECT)).await?;

        let reply = match read_pdu(&mut reader).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                return Err(ClientError::AuthenticationRejected {
                    reason: "server closed the stream".to_string(),
                })
            }
            Err(e) => {
                return Err(ClientError::AuthenticationRejected {
                    reason: e.to_string(),
                })
            }
        };
        if !reply.kind.is_ack() {
            return Err(ClientError::UnexpectedReply(reply.kind));
        }

        let nickname = reply.payload_lossy();
        tracing::info!("Authenticated as {}", nickname);
        Ok(Self {
            reader,
            writer,
            nickname,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        })
    }

    /// Override the keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Nickname acknowledged by the server.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Run the session until input ends, the server goes away, or the
    /// keepalive fails.
    pub async fn run<I>(
        self,
        input: I,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<SessionEnd>
    where
        I: AsyncBufRead + Unpin,
    {
        let away = Arc::new(AtomicBool::new(false));

        let mut receive = tokio::spawn(receive_loop(
            self.reader,
            self.writer.clone(),
            self.nickname.clone(),
            away.clone(),
            events.clone(),
        ));
        let mut keepalive = spawn_keepalive(self.writer.clone(), self.keepalive_interval);

        let outcome = tokio::select! {
            result = command_loop(input, &self.writer, &self.nickname, &away, &events) => result,
            result = &mut receive => match result {
                Ok(Ok(())) => Ok(SessionEnd::ServerClosed),
                Ok(Err(e)) => Err(ClientError::Stream(e)),
                Err(e) => Err(ClientError::Task(e.to_string())),
            },
            result = &mut keepalive => match result {
                Ok(stopped) => Ok(SessionEnd::KeepaliveStopped(stopped)),
                Err(e) => Err(ClientError::Task(e.to_string())),
            },
        };

        receive.abort();
        keepalive.abort();
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Stream shutdown failed: {}", e);
        }

        tracing::info!("Session ended: {:?}", outcome);
        outcome
    }
}

/// The away auto-reply for `pdu`, if it calls for one.
///
/// Only plain DATA deliveries of the form `"sender: message"` get a reply,
/// never one from ourselves and never another away notice.
pub fn away_reply(pdu: &Pdu, nickname: &str) -> Option<DirectMessage> {
    if pdu.kind != PduType::DATA {
        return None;
    }
    let delivery = Delivery::parse(pdu.payload_str().ok()?)?;
    if delivery.sender == nickname || delivery.text == AWAY_NOTICE {
        return None;
    }
    Some(DirectMessage::new(&delivery.sender, AWAY_NOTICE, nickname))
}

async fn receive_loop<R>(
    mut reader: R,
    writer: PduWriter,
    nickname: String,
    away: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ClientEvent>,
) -> std::result::Result<(), PduIoError>
where
    R: AsyncRead + Unpin,
{
    while let Some(pdu) = read_pdu(&mut reader).await? {
        if away.load(Ordering::Relaxed) {
            if let Some(reply) = away_reply(&pdu, &nickname) {
                tracing::debug!("Away reply to {}", reply.recipient);
                writer.send(&reply.to_pdu()).await?;
            }
        }
        let _ = events.send(ClientEvent::Message(pdu.payload_lossy()));
    }
    tracing::debug!("Server closed the stream");
    Ok(())
}

async fn command_loop<I>(
    input: I,
    writer: &PduWriter,
    nickname: &str,
    away: &AtomicBool,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<SessionEnd>
where
    I: AsyncBufRead + Unpin,
{
    let notice = |text: String| {
        let _ = events.send(ClientEvent::Notice(text));
    };

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Exit => return Ok(SessionEnd::Exit),
            Command::List => writer.send(&Pdu::empty(PduType::LIST)).await?,
            Command::Away => {
                let now_away = !away.fetch_xor(true, Ordering::Relaxed);
                notice(if now_away {
                    "away: incoming messages get an automatic reply".to_string()
                } else {
                    "back".to_string()
                });
            }
            Command::Direct { recipient, text } => {
                let dm = DirectMessage::new(&recipient, &text, nickname);
                writer.send(&dm.to_pdu()).await?;
            }
            Command::Empty => {}
            Command::Invalid(reason) => notice(reason),
        }
    }
    Ok(SessionEnd::InputClosed)
}
