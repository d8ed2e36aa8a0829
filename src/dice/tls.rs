//! TLS configuration for the directory connection.
//!
//! Builds a `rustls::ClientConfig` from [`TlsOptions`] and hands it to
//! `reqwest` as a preconfigured TLS backend. Every option has a default and
//! is overridable on its own:
//!
//! ```yaml
//! dice:
//!   ssl:
//!     ca_file:     "/etc/dice/tls/ca.crt"     # default: bundled web PKI roots
//!     client_cert: "/etc/dice/tls/client.crt" # optional, needs client_key
//!     client_key:  "/etc/dice/tls/client.key"
//!     min_version: "TLSv1.2"
//!     max_version: "TLSv1.3"
//!     verify_depth: 3                         # max intermediates in the chain
//! ```
//!
//! # File format
//!
//! Certificate and key files are expected in **PEM format**.

use std::fs;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// TLS protocol versions rustls can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.2
    #[serde(rename = "TLSv1.2", alias = "tls1.2", alias = "1.2")]
    Tls12,
    /// TLS 1.3
    #[serde(rename = "TLSv1.3", alias = "tls1.3", alias = "1.3")]
    Tls13,
}

impl TlsVersion {
    fn protocol(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// TLS options for the outbound directory connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// PEM bundle of trusted CAs. Bundled web PKI roots when unset.
    pub ca_file: Option<String>,

    /// PEM client certificate chain presented to the directory.
    pub client_cert: Option<String>,

    /// PEM private key for `client_cert`.
    pub client_key: Option<String>,

    /// Lowest protocol version offered.
    pub min_version: TlsVersion,

    /// Highest protocol version offered.
    pub max_version: TlsVersion,

    /// Maximum number of intermediate certificates accepted in the server chain.
    pub verify_depth: usize,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            ca_file: None,
            client_cert: None,
            client_key: None,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            verify_depth: 3,
        }
    }
}

impl TlsOptions {
    /// Check option combinations that no connection could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.min_version > self.max_version {
            return Err(Error::Config(format!(
                "ssl.min_version {:?} is above ssl.max_version {:?}",
                self.min_version, self.max_version
            )));
        }
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err(Error::Config(
                "ssl.client_cert is set but ssl.client_key is missing".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "ssl.client_key is set but ssl.client_cert is missing".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn protocol_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| *v >= self.min_version && *v <= self.max_version)
            .map(TlsVersion::protocol)
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS client config
// ─────────────────────────────────────────────────────────────────────────────

/// Build the `rustls::ClientConfig` used for directory lookups.
///
/// # Errors
///
/// Returns an error if a certificate or key file cannot be read or parsed,
/// or if rustls rejects the resulting configuration.
pub fn build_client_config(options: &TlsOptions) -> Result<ClientConfig> {
    options.validate()?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = Arc::new(load_root_store(options.ca_file.as_deref())?);
    let verifier = DepthLimitedVerifier::new(roots, Arc::clone(&provider), options.verify_depth)?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&options.protocol_versions())
        .map_err(|e| Error::Config(format!("Unsupported TLS version range: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match (&options.client_cert, &options.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Config(format!("TLS client cert error (cert/key mismatch?): {e}")))?
        }
        _ => builder.with_no_client_auth(),
    };

    debug!(
        ca_file = ?options.ca_file,
        client_cert = ?options.client_cert,
        min_version = ?options.min_version,
        max_version = ?options.max_version,
        verify_depth = options.verify_depth,
        "Directory TLS config built"
    );

    Ok(config)
}

fn load_root_store(ca_file: Option<&str>) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                store.add(cert).map_err(|e| {
                    Error::Config(format!("Failed to add CA cert from '{path}' to trust store: {e}"))
                })?;
            }
        }
        None => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Config(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Config(format!("No private key found in '{path}'")))
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Depth-limited server verification
// ─────────────────────────────────────────────────────────────────────────────

/// WebPKI verification plus a cap on the number of intermediates.
#[derive(Debug)]
struct DepthLimitedVerifier {
    inner: Arc<WebPkiServerVerifier>,
    max_depth: usize,
}

impl DepthLimitedVerifier {
    fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>, max_depth: usize) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build server verifier: {e}")))?;
        Ok(Self { inner, max_depth })
    }
}

impl ServerCertVerifier for DepthLimitedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if intermediates.len() > self.max_depth {
            return Err(rustls::Error::General(format!(
                "certificate chain has {} intermediates, verify_depth allows {}",
                intermediates.len(),
                self.max_depth
            )));
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
