//! Configuration management
//!
//! Options are layered with figment: an optional YAML file, then
//! `DICE_AUTH_`-prefixed environment variables (`__` separates nesting, e.g.
//! `DICE_AUTH_DICE__CAS_SERVER`). The strategy block is deserialized into
//! [`DiceOptions`] and validated once into an immutable [`DiceConfig`].

use std::{path::Path, time::Duration};

use dice_core::DnOptions;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::dice::decode::ResponseFormat;
use crate::dice::info::NameFormat;
use crate::dice::tls::TlsOptions;
use crate::server::DEFAULT_SESSION_TTL;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Host server configuration
    pub server: ServerConfig,
    /// Strategy options
    pub dice: DiceOptions,
}

impl Config {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("DICE_AUTH_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }
}

/// Host server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-request timeout for the whole handler, directory call included
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Name of the cookie carrying the session id
    pub session_cookie: String,
    /// How long a session lives after its last write
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(30),
            session_cookie: "dice_session".to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy options (as written by the operator)
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy options as deserialized. Required options are `Option` here and
/// checked by [`DiceConfig::from_options`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiceOptions {
    /// Provider name; also the route segment (`/auth/{name}`)
    pub name: String,
    /// Base URL of the CAS/directory server (required)
    pub cas_server: Option<String>,
    /// Path of the DN lookup endpoint, e.g. `/users` (required)
    pub authentication_path: Option<String>,
    /// Path segment appended after the DN
    pub return_field: String,
    /// Response format requested from the directory
    pub format: ResponseFormat,
    /// Media type sent as `Accept`/`Content-Type`; derived from `format` when unset
    pub format_header: Option<String>,
    /// Root element of XML responses
    pub xml_root: String,
    /// Timeout for the directory lookup
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How `info.name` is derived when the directory does not supply one
    pub name_format: Option<NameFormat>,
    /// Visa whose presence sets `primary_visa?`
    pub primary_visa: Option<String>,
    /// Absolute URL to redirect to after the request phase
    pub custom_callback_url: Option<String>,
    /// Redirect to the absolute callback URL instead of the bare path
    pub use_callback_url: bool,
    /// Callback path; defaults to `/auth/{name}/callback`
    pub callback_path: Option<String>,
    /// Header carrying the client certificate (PEM)
    pub client_cert_header: String,
    /// Header carrying a pre-extracted subject DN
    pub subject_dn_header: String,
    /// Header carrying a pre-extracted issuer DN
    pub issuer_dn_header: String,
    /// TLS options for the directory connection
    pub ssl: TlsOptions,
    /// DN canonicalization options
    pub dn: DnOptions,
}

impl Default for DiceOptions {
    fn default() -> Self {
        Self {
            name: "dice".to_string(),
            cas_server: None,
            authentication_path: None,
            return_field: "info".to_string(),
            format: ResponseFormat::Json,
            format_header: None,
            xml_root: "userinfo".to_string(),
            timeout: Duration::from_secs(10),
            name_format: None,
            primary_visa: None,
            custom_callback_url: None,
            use_callback_url: false,
            callback_path: None,
            client_cert_header: "HTTP_SSL_CLIENT_CERT".to_string(),
            subject_dn_header: "HTTP_SSL_CLIENT_S_DN".to_string(),
            issuer_dn_header: "HTTP_SSL_CLIENT_I_DN".to_string(),
            ssl: TlsOptions::default(),
            dn: DnOptions::default(),
        }
    }
}

impl DiceOptions {
    /// Options with the two required fields set and everything else default.
    #[must_use]
    pub fn new(cas_server: impl Into<String>, authentication_path: impl Into<String>) -> Self {
        Self {
            cas_server: Some(cas_server.into()),
            authentication_path: Some(authentication_path.into()),
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated strategy configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Validated, immutable strategy configuration.
#[derive(Debug, Clone)]
pub struct DiceConfig {
    /// Provider name
    pub name: String,
    /// Directory base URL, without trailing slash
    pub cas_server: String,
    /// Lookup endpoint path
    pub authentication_path: String,
    /// Segment after the DN
    pub return_field: String,
    /// Response format
    pub format: ResponseFormat,
    /// Media type for `Accept`/`Content-Type`
    pub format_header: String,
    /// XML root element
    pub xml_root: String,
    /// Directory lookup timeout
    pub timeout: Duration,
    /// Name derivation
    pub name_format: Option<NameFormat>,
    /// Primary visa
    pub primary_visa: Option<String>,
    /// Custom callback URL
    pub custom_callback_url: Option<String>,
    /// Redirect to the absolute callback URL
    pub use_callback_url: bool,
    /// Callback path
    pub callback_path: String,
    /// Certificate header name
    pub client_cert_header: String,
    /// Subject DN header name
    pub subject_dn_header: String,
    /// Issuer DN header name
    pub issuer_dn_header: String,
    /// TLS options
    pub ssl: TlsOptions,
    /// DN canonicalization options
    pub dn: DnOptions,
}

impl DiceConfig {
    /// Validate operator options, failing fast on anything a request could
    /// not recover from.
    pub fn from_options(options: DiceOptions) -> Result<Self> {
        let cas_server = required(options.cas_server, "cas_server")?;
        let authentication_path = required(options.authentication_path, "authentication_path")?;

        Url::parse(&cas_server)
            .map_err(|e| Error::Config(format!("Invalid cas_server URL '{cas_server}': {e}")))?;
        if options.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        options
            .dn
            .validate()
            .map_err(|e| Error::Config(format!("Invalid dn options: {e}")))?;
        options.ssl.validate()?;

        let authentication_path = if authentication_path.starts_with('/') {
            authentication_path
        } else {
            format!("/{authentication_path}")
        };
        let format_header = options
            .format_header
            .unwrap_or_else(|| options.format.media_type().to_string());
        let callback_path = options
            .callback_path
            .unwrap_or_else(|| format!("/auth/{}/callback", options.name));

        Ok(Self {
            name: options.name,
            cas_server: cas_server.trim_end_matches('/').to_string(),
            authentication_path: authentication_path.trim_end_matches('/').to_string(),
            return_field: options.return_field,
            format: options.format,
            format_header,
            xml_root: options.xml_root,
            timeout: options.timeout,
            name_format: options.name_format,
            primary_visa: options.primary_visa,
            custom_callback_url: options.custom_callback_url,
            use_callback_url: options.use_callback_url,
            callback_path,
            client_cert_header: options.client_cert_header,
            subject_dn_header: options.subject_dn_header,
            issuer_dn_header: options.issuer_dn_header,
            ssl: options.ssl,
            dn: options.dn,
        })
    }

    /// Path that starts the request phase.
    #[must_use]
    pub fn request_path(&self) -> String {
        format!("/auth/{}", self.name)
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(Error::MissingConfiguration(name))
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
