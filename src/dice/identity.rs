//! Client DN extraction.
//!
//! A DN reaches the strategy in one of three ways, tried in order:
//!
//! 1. a peer certificate handed over by a TLS-terminating host (DER, as a
//!    [`PeerCertificate`] request extension),
//! 2. the client certificate header set by a reverse proxy (PEM, possibly
//!    flattened onto one line or URL-escaped, or bare base64 DER),
//! 3. the subject/issuer DN header set by the proxy.
//!
//! Certificate DNs are rendered in OpenSSL slash form
//! (`/DC=org/DC=ruby-lang/CN=Ruby certificate rbcert`). Nothing here
//! validates the certificate; the transport is trusted.

use std::fmt;
use std::sync::OnceLock;

use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use crate::config::DiceConfig;

/// Which DN of the client certificate is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnKind {
    /// The client itself
    Subject,
    /// The authority that issued the client certificate
    Issuer,
}

impl fmt::Display for DnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => f.write_str("subject"),
            Self::Issuer => f.write_str("issuer"),
        }
    }
}

/// DER client certificate captured by the TLS layer.
///
/// Hosts terminating TLS themselves insert this into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate(pub Vec<u8>);

/// Everything the transport tells us about the client.
#[derive(Debug, Clone, Default)]
pub struct TransportInputs {
    /// Request headers
    pub headers: HeaderMap,
    /// DER peer certificate, when TLS terminated in-process
    pub peer_certificate: Option<Vec<u8>>,
    /// Path the client asked to return to after authenticating
    pub origin: Option<String>,
}

impl TransportInputs {
    /// Inputs carrying only headers.
    #[must_use]
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            peer_certificate: None,
            origin: None,
        }
    }

    /// Attach a DER peer certificate.
    #[must_use]
    pub fn with_peer_certificate(mut self, der: Vec<u8>) -> Self {
        self.peer_certificate = Some(der);
        self
    }

    /// Attach the requested return path.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Non-blank header value by rack/CGI-style name (`HTTP_SSL_CLIENT_S_DN`).
    #[must_use]
    pub fn header(&self, configured: &str) -> Option<&str> {
        self.headers
            .get(header_name(configured).as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Map a rack/CGI-style variable name onto an HTTP header name.
///
/// `HTTP_SSL_CLIENT_S_DN` → `ssl-client-s-dn`.
#[must_use]
pub fn header_name(configured: &str) -> String {
    let trimmed = configured.trim();
    let stripped = trimmed
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("HTTP_"))
        .map_or(trimmed, |_| &trimmed[5..]);
    stripped.replace('_', "-").to_ascii_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractor
// ─────────────────────────────────────────────────────────────────────────────

/// Reads raw client DNs using the configured header names.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    client_cert_header: String,
    subject_dn_header: String,
    issuer_dn_header: String,
}

impl IdentityExtractor {
    /// Extractor using the header names of `config`.
    #[must_use]
    pub fn new(config: &DiceConfig) -> Self {
        Self {
            client_cert_header: config.client_cert_header.clone(),
            subject_dn_header: config.subject_dn_header.clone(),
            issuer_dn_header: config.issuer_dn_header.clone(),
        }
    }

    /// Raw DN of `kind`, or `None` when the request carries none.
    #[must_use]
    pub fn extract_dn(&self, inputs: &TransportInputs, kind: DnKind) -> Option<String> {
        if let Some(der) = &inputs.peer_certificate {
            if let Some(dn) = dn_from_der(der, kind) {
                debug!(%kind, dn = %dn, "DN from peer certificate");
                return Some(dn);
            }
        }

        if let Some(raw) = inputs.header(&self.client_cert_header) {
            debug!(%kind, certificate = %raw, "Client certificate header present");
            match decode_certificate_header(raw) {
                Some(der) => {
                    if let Some(dn) = dn_from_der(&der, kind) {
                        debug!(%kind, dn = %dn, "DN from certificate header");
                        return Some(dn);
                    }
                }
                None => warn!(
                    header = %self.client_cert_header,
                    "Client certificate header is not a PEM or base64 DER certificate"
                ),
            }
        }

        let header = match kind {
            DnKind::Subject => &self.subject_dn_header,
            DnKind::Issuer => &self.issuer_dn_header,
        };
        let dn = inputs.header(header).map(str::to_string);
        debug!(%kind, dn = ?dn, "DN from header");
        dn
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Recover DER bytes from a proxy certificate header.
fn decode_certificate_header(raw: &str) -> Option<Vec<u8>> {
    static ARMOR_RE: OnceLock<Regex> = OnceLock::new();
    let armor_re = ARMOR_RE.get_or_init(|| Regex::new(r"-----(BEGIN|END) [A-Z0-9 ]+-----").unwrap());

    let unescaped = if raw.contains('%') {
        percent_decode_str(raw).decode_utf8().ok()?.into_owned()
    } else {
        raw.to_string()
    };

    let body: String = armor_re
        .replace_all(&unescaped, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if body.is_empty() {
        return None;
    }

    STANDARD.decode(body.as_bytes()).ok()
}

/// Slash-form DN of `kind` from a DER certificate.
fn dn_from_der(der: &[u8], kind: DnKind) -> Option<String> {
    match X509Certificate::from_der(der) {
        Ok((_, cert)) => {
            let name = match kind {
                DnKind::Subject => cert.subject(),
                DnKind::Issuer => cert.issuer(),
            };
            render_slash_dn(name)
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse client certificate");
            None
        }
    }
}

/// Render an X.509 name as `/K=v/K=v`, in encoded order.
fn render_slash_dn(name: &X509Name<'_>) -> Option<String> {
    let mut rendered = String::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let oid = attr.attr_type().to_id_string();
            let Ok(value) = attr.as_str() else {
                debug!(oid = %oid, "Skipping non-string DN attribute");
                continue;
            };
            rendered.push('/');
            rendered.push_str(short_name(&oid).unwrap_or(&oid));
            rendered.push('=');
            rendered.push_str(value);
        }
    }
    (!rendered.is_empty()).then_some(rendered)
}

/// OpenSSL short name for common DN attribute OIDs.
fn short_name(oid: &str) -> Option<&'static str> {
    Some(match oid {
        "2.5.4.3" => "CN",
        "2.5.4.4" => "SN",
        "2.5.4.5" => "serialNumber",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "street",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.12" => "title",
        "2.5.4.42" => "GN",
        "0.9.2342.19200300.100.1.1" => "UID",
        "0.9.2342.19200300.100.1.25" => "DC",
        "1.2.840.113549.1.9.1" => "emailAddress",
        _ => return None,
    })
}
