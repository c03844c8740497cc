//! # quicchat
//!
//! Relay server and console chat client.
//!
//! ## Commands
//!
//! - `serve`: Run a relay, optionally federated with a partner relay
//! - `connect`: Join a relay as a chat client
//!
//! ## Example
//!
//! ```bash
//! # Two federated relays on one machine
//! quicchat serve --bind 127.0.0.1:4242 --export-cert east.pem
//! quicchat serve --bind 127.0.0.1:4243
//!
//! # Clients
//! quicchat connect --nickname alice --server localhost:4242 --cert east.pem
//! quicchat connect --nickname carol --server localhost:4243
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{connect, serve};

/// Federated chat over QUIC.
#[derive(Parser, Debug)]
#[command(name = "quicchat")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a relay server
    Serve {
        /// TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// Partner relay address, overrides the config file
        #[arg(long, conflicts_with = "no_federation")]
        peer: Option<String>,

        /// Shared secret, overrides the config file
        #[arg(long)]
        secret: Option<String>,

        /// Do not dial a partner relay
        #[arg(long)]
        no_federation: bool,

        /// Write the generated certificate here so clients can pin it
        #[arg(long)]
        export_cert: Option<PathBuf>,
    },

    /// Connect to a relay as a chat client
    Connect {
        /// Nickname to register
        #[arg(long, short)]
        nickname: String,

        /// Relay address
        #[arg(long, short, default_value = "localhost:4242")]
        server: String,

        /// Shared secret
        #[arg(long, default_value = "password123")]
        secret: String,

        /// Relay certificate to pin (accepts any certificate when omitted)
        #[arg(long)]
        cert: Option<PathBuf>,

        /// TLS server name expected in the relay certificate
        #[arg(long, default_value = "localhost")]
        server_name: String,
    },
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Chat output owns stdout.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            bind,
            peer,
            secret,
            no_federation,
            export_cert,
        } => {
            serve::run(serve::ServeArgs {
                config,
                bind,
                peer,
                secret,
                no_federation,
                export_cert,
            })
            .await?;
        }
        Commands::Connect {
            nickname,
            server,
            secret,
            cert,
            server_name,
        } => {
            connect::run(connect::ConnectArgs {
                nickname,
                server,
                secret,
                cert,
                server_name,
            })
            .await?;
        }
    }

    Ok(())
}
