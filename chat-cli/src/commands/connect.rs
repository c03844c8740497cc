//! Connect command - console chat client.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chat_client::{connect, ClientEvent, ConnectOptions, SessionEnd};
use chat_core::ServerTrust;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Options for `quicchat connect`.
#[derive(Debug)]
pub struct ConnectArgs {
    pub nickname: String,
    pub server: String,
    pub secret: String,
    pub cert: Option<PathBuf>,
    pub server_name: String,
}

/// Run the connect command.
pub async fn run(args: ConnectArgs) -> Result<()> {
    let mut options = ConnectOptions::new(&args.server, &args.nickname, &args.secret);
    options.server_name = args.server_name;
    if let Some(cert) = &args.cert {
        options.trust = ServerTrust::from_pem_file(cert)
            .with_context(|| format!("Failed to load certificate {}", cert.display()))?;
    }

    let client = connect(&options)
        .await
        .with_context(|| format!("Failed to join {}", args.server))?;
    println!(
        "Connected as {}. Type recipient|message, list, away or exit.",
        client.nickname()
    );

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", render(&event));
        }
    });

    let stdin = forward_lines(std::io::BufReader::new(std::io::stdin()));
    let end = client.run(BufReader::new(stdin), events_tx).await?;
    let _ = printer.await;

    match end {
        SessionEnd::Exit | SessionEnd::InputClosed => {}
        SessionEnd::ServerClosed => println!("*** server closed the connection"),
        SessionEnd::KeepaliveStopped(stopped) => {
            println!("*** connection lost: {}", stopped);
        }
    }
    Ok(())
}

/// Copy lines from a blocking reader into an in-memory pipe.
///
/// The reader runs on a detached thread, so a pending stdin read does not
/// hold up runtime shutdown once the session has ended.
fn forward_lines<R>(input: R) -> DuplexStream
where
    R: BufRead + Send + 'static,
{
    let (mut tx, rx) = tokio::io::duplex(4096);
    let runtime = tokio::runtime::Handle::current();
    std::thread::spawn(move || {
        for line in input.lines() {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if runtime.block_on(tx.write_all(line.as_bytes())).is_err() {
                break;
            }
        }
    });
    rx
}

fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Message(text) => text.clone(),
        ClientEvent::Notice(text) => format!("*** {text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwarded_lines_end_with_input() {
        use tokio::io::AsyncBufReadExt;

        let input = std::io::Cursor::new(b"list\nbob|hi\n".to_vec());
        let mut lines = BufReader::new(forward_lines(input)).lines();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("list"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("bob|hi"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[test]
    fn messages_print_verbatim_and_notices_are_marked() {
        assert_eq!(
            render(&ClientEvent::Message("alice: hi".into())),
            "alice: hi"
        );
        assert_eq!(render(&ClientEvent::Notice("back".into())), "*** back");
    }
}
