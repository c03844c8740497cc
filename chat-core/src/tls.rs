//! Certificate/key provisioning for the QUIC transport.
//!
//! Servers present a [`TlsIdentity`], either loaded from PEM files or
//! generated as a self-signed certificate for local relay pairs. Dialers
//! (clients and the federation link) choose a [`ServerTrust`]: pin the
//! server's PEM certificate, or accept any certificate.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;

use crate::quic::ALPN;

/// Certificate provisioning errors.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Failed to read a PEM file.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// PEM file contains no usable entry.
    #[error("no {what} found in {path}")]
    Missing {
        /// Entry kind (certificate, private key).
        what: &'static str,
        /// File path.
        path: PathBuf,
    },

    /// Self-signed certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Server certificate chain and private key.
pub struct TlsIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    cert_pem: Option<String>,
}

impl TlsIdentity {
    /// Generate a self-signed certificate for the given subject names.
    pub fn generate(subject_alt_names: &[&str]) -> Result<Self, TlsError> {
        let names: Vec<String> = subject_alt_names.iter().map(|s| s.to_string()).collect();
        let certified = rcgen::generate_simple_self_signed(names)?;

        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        Ok(Self {
            cert_chain: vec![certified.cert.der().clone()],
            key: key.into(),
            cert_pem: Some(certified.cert.pem()),
        })
    }

    /// Load a certificate chain and private key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_chain = read_certificates(cert_path)?;

        let mut reader = open_pem(key_path)?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|source| TlsError::Read {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| TlsError::Missing {
                what: "private key",
                path: key_path.to_path_buf(),
            })?;

        Ok(Self {
            cert_chain,
            key,
            cert_pem: None,
        })
    }

    /// The leaf certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert_chain[0]
    }

    /// PEM form of a generated certificate, for handing to clients.
    pub fn certificate_pem(&self) -> Option<&str> {
        self.cert_pem.as_deref()
    }

    /// rustls server configuration (TLS 1.3, quicchat ALPN).
    pub fn server_crypto(&self) -> Result<rustls::ServerConfig, TlsError> {
        let mut config = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![ALPN.to_vec()];
        Ok(config)
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("certificates", &self.cert_chain.len())
            .field("key", &"[REDACTED]")
            .field("generated", &self.cert_pem.is_some())
            .finish()
    }
}

/// How a dialer authenticates the server it connects to.
#[derive(Debug, Clone)]
pub enum ServerTrust {
    /// Trust only these certificates.
    Pinned(Vec<CertificateDer<'static>>),
    /// Accept any server certificate. The session is still encrypted.
    AcceptAny,
}

impl ServerTrust {
    /// Pin the certificates in a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self, TlsError> {
        Ok(Self::Pinned(read_certificates(path)?))
    }

    /// Pin the certificate in `pem`.
    pub fn from_pem(pem: &str) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Read {
                path: PathBuf::from("<memory>"),
                source,
            })?;
        if certs.is_empty() {
            return Err(TlsError::Missing {
                what: "certificate",
                path: PathBuf::from("<memory>"),
            });
        }
        Ok(Self::Pinned(certs))
    }

    /// Pin an optional PEM file, accepting any certificate when absent.
    pub fn from_optional_pem_file(path: Option<&Path>) -> Result<Self, TlsError> {
        match path {
            Some(path) => Self::from_pem_file(path),
            None => Ok(Self::AcceptAny),
        }
    }

    /// rustls client configuration (TLS 1.3, quicchat ALPN).
    pub fn client_crypto(&self) -> Result<rustls::ClientConfig, TlsError> {
        let provider = provider();
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let mut config = match self {
            Self::Pinned(certs) => {
                let mut roots = RootCertStore::empty();
                for cert in certs {
                    roots.add(cert.clone())?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            Self::AcceptAny => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                .with_no_client_auth(),
        };
        config.alpn_protocols = vec![ALPN.to_vec()];
        Ok(config)
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open_pem(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::Missing {
            what: "certificate",
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Verifier that accepts any certificate but still checks handshake
/// signatures against it.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
