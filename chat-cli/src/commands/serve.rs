//! Serve command - run a relay until Ctrl-C.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chat_relay::{Config, RelayServer};

/// Options for `quicchat serve`.
#[derive(Debug, Default)]
pub struct ServeArgs {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub peer: Option<String>,
    pub secret: Option<String>,
    pub no_federation: bool,
    pub export_cert: Option<PathBuf>,
}

/// Build the relay configuration: file first, then flags.
pub fn load_config(args: &ServeArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(peer) = &args.peer {
        config.federation.peer_address = Some(peer.clone());
    }
    if let Some(secret) = &args.secret {
        config.server.secret = secret.clone();
    }
    if args.no_federation {
        config.federation.enabled = false;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = load_config(&args)?;
    let identity = config
        .tls
        .identity()
        .context("Failed to load TLS certificate")?;

    if let Some(path) = &args.export_cert {
        export_certificate(identity.certificate_pem(), path)?;
    }

    if config.federation.enabled {
        tracing::info!("Federation partner: {}", config.peer_address());
    } else {
        tracing::info!("Federation disabled");
    }

    let server = RelayServer::bind_with_identity(config, &identity)
        .context("Failed to start relay")?;
    println!("Relay listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;
    Ok(())
}

fn export_certificate(pem: Option<&str>, path: &Path) -> Result<()> {
    let Some(pem) = pem else {
        tracing::warn!(
            "Certificate was loaded from [tls] files; not exporting to {}",
            path.display()
        );
        return Ok(());
    };
    std::fs::write(path, pem)
        .with_context(|| format!("Failed to write certificate to {}", path.display()))?;
    tracing::info!("Certificate written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbind_address = \"127.0.0.1:5000\"\nsecret = \"from-file\"\n\n[federation]\npeer_address = \"file-peer:1\""
        )
        .unwrap();

        let args = ServeArgs {
            config: Some(file.path().to_path_buf()),
            bind: Some("127.0.0.1:4243".into()),
            secret: Some("from-flag".into()),
            ..Default::default()
        };
        let config = load_config(&args).unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:4243");
        assert_eq!(config.server.secret, "from-flag");
        assert_eq!(config.peer_address(), "file-peer:1");
        assert!(config.federation.enabled);
    }

    #[test]
    fn no_federation_flag_disables_link() {
        let args = ServeArgs {
            no_federation: true,
            ..Default::default()
        };
        assert!(!load_config(&args).unwrap().federation.enabled);
    }

    #[test]
    fn bad_bind_address_is_reported() {
        let args = ServeArgs {
            bind: Some("nowhere".into()),
            ..Default::default()
        };
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let args = ServeArgs {
            config: Some(PathBuf::from("/nonexistent/relay.toml")),
            ..Default::default()
        };
        let err = load_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn generated_certificate_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pem");
        export_certificate(Some("-----BEGIN CERTIFICATE-----\n"), &path).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));

        let skipped = dir.path().join("skipped.pem");
        export_certificate(None, &skipped).unwrap();
        assert!(!skipped.exists());
    }
}
