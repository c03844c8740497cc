//! Client agents talking through a real relay.

extern crate quicchat_client as chat_client;

use std::sync::Arc;
use std::time::Duration;

use chat_client::{connect, ClientAgent, ClientEvent, ConnectOptions, SessionEnd};
use chat_core::{PduWriter, ServerTrust, TlsIdentity};
use chat_relay::{ChatRelay, Config, RelayServer, StreamHandler};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct Console {
    input: DuplexStream,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    session: JoinHandle<chat_client::error::Result<SessionEnd>>,
}

impl Console {
    async fn type_line(&mut self, line: &str) {
        self.input
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn next_message(&mut self) -> String {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("event channel closed");
            if let ClientEvent::Message(text) = event {
                return text;
            }
        }
    }
}

async fn login(relay: &Arc<ChatRelay>, nickname: &str) -> ClientAgent<ReadHalf<DuplexStream>> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    tokio::spawn(
        StreamHandler::new(relay.clone(), server_read, PduWriter::new(server_write)).run(),
    );

    let (reader, writer) = tokio::io::split(client);
    ClientAgent::login(reader, PduWriter::new(writer), nickname, "password123")
        .await
        .unwrap()
}

fn start(agent: ClientAgent<ReadHalf<DuplexStream>>) -> Console {
    let (input, agent_input) = tokio::io::duplex(1024);
    let (events_tx, events) = mpsc::unbounded_channel();
    let session = tokio::spawn(agent.run(BufReader::new(agent_input), events_tx));
    Console {
        input,
        events,
        session,
    }
}

#[tokio::test]
async fn dm_and_list_between_agents() {
    let relay = Arc::new(ChatRelay::new(Config::default()));
    let mut alice = start(login(&relay, "alice").await);
    let mut bob = start(login(&relay, "bob").await);

    alice.type_line("bob|hello bob").await;
    assert_eq!(bob.next_message().await, "alice: hello bob");

    bob.type_line("list").await;
    assert_eq!(bob.next_message().await, "alice,bob");

    alice.type_line("exit").await;
    let end = alice.session.await.unwrap().unwrap();
    assert!(matches!(end, SessionEnd::Exit));
}

#[tokio::test]
async fn away_agents_do_not_ping_pong() {
    let relay = Arc::new(ChatRelay::new(Config::default()));
    let mut alice = start(login(&relay, "alice").await);
    let mut bob = start(login(&relay, "bob").await);

    alice.type_line("away").await;
    bob.type_line("away").await;
    // Let both toggles land before the first message.
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice.type_line("bob|are you there?").await;
    assert_eq!(bob.next_message().await, "alice: are you there?");
    assert_eq!(alice.next_message().await, "bob: I am away");

    // Alice does not answer bob's away notice.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = bob.events.try_recv() {
        assert!(!matches!(event, ClientEvent::Message(_)), "unexpected {event:?}");
    }
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let relay = Arc::new(ChatRelay::new(Config::default()));
    let (client, server) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server);
    tokio::spawn(StreamHandler::new(relay, server_read, PduWriter::new(server_write)).run());

    let (reader, writer) = tokio::io::split(client);
    let result = ClientAgent::login(reader, PduWriter::new(writer), "alice", "nope").await;
    assert!(matches!(
        result,
        Err(chat_client::ClientError::AuthenticationRejected { .. })
    ));
}

#[tokio::test]
async fn agents_over_quic() {
    let identity = TlsIdentity::generate(&["localhost"]).unwrap();
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1:0".into();
    config.federation.enabled = false;
    let server = RelayServer::bind_with_identity(config, &identity).unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let relay_task = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut options = ConnectOptions::new(&addr.to_string(), "alice", "password123");
    options.trust = ServerTrust::from_pem(identity.certificate_pem().unwrap()).unwrap();
    let alice = connect(&options).await.unwrap();
    assert_eq!(alice.nickname(), "alice");

    options.nickname = "bob".into();
    let bob = connect(&options).await.unwrap();

    let (mut alice_input, alice_in) = tokio::io::duplex(1024);
    let (alice_events_tx, _alice_events) = mpsc::unbounded_channel();
    let alice_session = tokio::spawn(alice.run(BufReader::new(alice_in), alice_events_tx));

    let (_bob_input, bob_in) = tokio::io::duplex(1024);
    let (bob_events_tx, mut bob_events) = mpsc::unbounded_channel();
    let _bob_session = tokio::spawn(bob.run(BufReader::new(bob_in), bob_events_tx));

    alice_input.write_all(b"bob|over quic\n").await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), bob_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ClientEvent::Message("alice: over quic".into()));

    alice_input.write_all(b"exit\n").await.unwrap();
    let end = alice_session.await.unwrap().unwrap();
    assert!(matches!(end, SessionEnd::Exit));

    let _ = stop.send(());
    relay_task.await.unwrap().unwrap();
}
