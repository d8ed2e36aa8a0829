//! Directory (CAS) lookup client.
//!
//! One GET per callback phase:
//!
//! ```text
//! {cas_server}{authentication_path}/{user_dn}/{return_field}.{format}[?issuerDN=…]
//! ```
//!
//! The DN travels percent-encoded as a single path segment. Nothing is
//! retried or cached; a failed lookup fails the attempt.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use super::decode::{Payload, ResponseFormat};
use super::tls::build_client_config;
use crate::config::DiceConfig;
use crate::{Error, Result};

/// User agent sent to the directory.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Canonical DNs handed from the request phase to the callback phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityQuery {
    /// Canonical subject DN
    pub user_dn: String,
    /// Canonical issuer DN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_dn: Option<String>,
}

impl IdentityQuery {
    /// Query for a subject DN without issuer.
    #[must_use]
    pub fn new(user_dn: impl Into<String>) -> Self {
        Self {
            user_dn: user_dn.into(),
            issuer_dn: None,
        }
    }

    /// Attach an issuer DN.
    #[must_use]
    pub fn with_issuer(mut self, issuer_dn: impl Into<String>) -> Self {
        self.issuer_dn = Some(issuer_dn.into());
        self
    }
}

/// Successful directory answer.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryResponse {
    /// HTTP status
    pub status: u16,
    /// Format the body was decoded as
    pub format: ResponseFormat,
    /// Body as received (empty for pre-structured responses)
    pub raw_body: Bytes,
    /// Decoded payload
    pub decoded: Payload,
    structured: bool,
}

impl DirectoryResponse {
    /// Response decoded from a raw body.
    #[must_use]
    pub fn decoded(status: u16, format: ResponseFormat, raw_body: Bytes, decoded: Payload) -> Self {
        Self {
            status,
            format,
            raw_body,
            decoded,
            structured: false,
        }
    }

    /// Response whose payload is already structured, skipping decoding.
    #[must_use]
    pub fn structured(payload: Payload) -> Self {
        Self {
            status: 200,
            format: ResponseFormat::Json,
            raw_body: Bytes::new(),
            decoded: payload,
            structured: true,
        }
    }

    /// Value recorded as `extra.raw_info`: the body text, or the payload
    /// itself when it arrived pre-structured.
    #[must_use]
    pub fn raw_info(&self) -> Value {
        if self.structured {
            Value::Object(self.decoded.clone())
        } else {
            Value::String(String::from_utf8_lossy(&self.raw_body).into_owned())
        }
    }
}

/// Something that can resolve an [`IdentityQuery`] into directory attributes.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// Look up the subject of `query`.
    ///
    /// # Errors
    ///
    /// [`Error::NetworkFailure`] when the directory cannot be reached,
    /// [`Error::InvalidCredentials`] when it rejects the DN, and
    /// [`Error::Decode`] when the body is malformed.
    async fn query(&self, query: &IdentityQuery) -> Result<DirectoryResponse>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// reqwest-backed [`DirectoryLookup`].
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: Client,
    base: Url,
    return_field: String,
    format: ResponseFormat,
    xml_root: String,
}

impl DirectoryClient {
    /// Build a client with the configured TLS, headers and timeout.
    pub fn new(config: &DiceConfig) -> Result<Self> {
        let base = Url::parse(&format!(
            "{}{}",
            config.cas_server, config.authentication_path
        ))
        .map_err(|e| Error::Config(format!("Invalid directory URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Directory URL cannot carry a path: {base}"
            )));
        }

        let format_header = HeaderValue::from_str(&config.format_header)
            .map_err(|e| Error::Config(format!("Invalid format_header: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, format_header.clone());
        headers.insert(CONTENT_TYPE, format_header);
        headers.insert(
            HeaderName::from_static("x-xsrf-useprotection"),
            HeaderValue::from_static("false"),
        );

        let tls = build_client_config(&config.ssl)?;
        let http = Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create directory client: {e}")))?;

        Ok(Self {
            http,
            base,
            return_field: config.return_field.clone(),
            format: config.format,
            xml_root: config.xml_root.clone(),
        })
    }

    /// Lookup URL for `query`.
    pub fn query_url(&self, query: &IdentityQuery) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("Directory URL cannot carry a path: {}", self.base)))?
            .pop_if_empty()
            .push(&query.user_dn)
            .push(&format!("{}.{}", self.return_field, self.format.extension()));

        if let Some(issuer) = &query.issuer_dn {
            url.query_pairs_mut().append_pair("issuerDN", issuer);
        }

        Ok(url)
    }
}

#[async_trait]
impl DirectoryLookup for DirectoryClient {
    async fn query(&self, query: &IdentityQuery) -> Result<DirectoryResponse> {
        let url = self.query_url(query)?;
        debug!(url = %url, "Querying directory");

        let response = self.http.get(url).send().await.map_err(|e| {
            warn!(error = %e, timeout = e.is_timeout(), "Directory request failed");
            Error::NetworkFailure(e.to_string())
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            warn!(error = %e, "Failed to read directory response");
            Error::NetworkFailure(e.to_string())
        })?;

        if status.as_u16() >= 400 {
            error!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "Directory rejected lookup"
            );
            return Err(Error::InvalidCredentials {
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), body = %String::from_utf8_lossy(&body), "Directory response");
        let decoded = self.format.decoder(&self.xml_root).decode(&body)?;

        Ok(DirectoryResponse::decoded(
            status.as_u16(),
            self.format,
            body,
            decoded,
        ))
    }
}
