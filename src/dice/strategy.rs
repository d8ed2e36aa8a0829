//! The two-phase DN authentication strategy.
//!
//! ```text
//! request phase:   transport → raw DNs → canonical DNs → session.params → redirect
//! callback phase:  session.params → directory → info mapping → session.auth → redirect
//! ```
//!
//! Phases never hold state between them other than the session, and a
//! phase that fails leaves the session exactly as it found it apart from a
//! consumed query.

use std::sync::Arc;

use axum::http::HeaderValue;
use dice_core::canonicalize;
use tracing::{debug, info, warn};

use super::directory::{DirectoryClient, DirectoryLookup, IdentityQuery};
use super::identity::{DnKind, IdentityExtractor, TransportInputs};
use super::info::{AttributeMapper, IdentityExtra, IdentityRecord};
use super::session::SessionData;
use crate::config::DiceConfig;
use crate::{Error, Result};

/// Redirect issued at the end of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// `Location` target
    pub location: String,
}

impl Redirect {
    fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Certificate DN strategy bound to one directory.
#[derive(Clone)]
pub struct DiceStrategy {
    config: Arc<DiceConfig>,
    extractor: IdentityExtractor,
    mapper: AttributeMapper,
    directory: Arc<dyn DirectoryLookup>,
}

impl std::fmt::Debug for DiceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiceStrategy")
            .field("name", &self.config.name)
            .field("cas_server", &self.config.cas_server)
            .finish_non_exhaustive()
    }
}

impl DiceStrategy {
    /// Strategy talking to the configured directory over HTTP.
    pub fn new(config: DiceConfig) -> Result<Self> {
        let directory = DirectoryClient::new(&config)?;
        Ok(Self::with_directory(config, Arc::new(directory)))
    }

    /// Strategy using a caller-supplied directory.
    #[must_use]
    pub fn with_directory(config: DiceConfig, directory: Arc<dyn DirectoryLookup>) -> Self {
        Self {
            extractor: IdentityExtractor::new(&config),
            mapper: AttributeMapper::new(config.name_format, config.primary_visa.clone()),
            config: Arc::new(config),
            directory,
        }
    }

    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &DiceConfig {
        &self.config
    }

    /// Provider name recorded in identities.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Canonicalize a raw DN with the configured order and case.
    pub fn canonicalize(&self, raw: &str) -> Result<String> {
        Ok(canonicalize(raw, &self.config.dn)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request phase
    // ─────────────────────────────────────────────────────────────────────────

    /// Extract and canonicalize the client DNs, record them, and redirect to
    /// the callback.
    ///
    /// # Errors
    ///
    /// [`Error::MissingDn`] without a subject DN, [`Error::InvalidDn`] when
    /// the subject or a present issuer cannot be canonicalized. The session
    /// is untouched on error.
    pub fn request_phase(
        &self,
        inputs: &TransportInputs,
        session: &mut SessionData,
    ) -> Result<Redirect> {
        let raw_subject = self
            .extractor
            .extract_dn(inputs, DnKind::Subject)
            .ok_or(Error::MissingDn)?;
        let user_dn = self.canonicalize(&raw_subject).inspect_err(|e| {
            warn!(raw_dn = %raw_subject, error = %e, "Subject DN rejected");
        })?;
        debug!(user_dn = %user_dn, "Formatted subject DN");

        let issuer_dn = match self.extractor.extract_dn(inputs, DnKind::Issuer) {
            Some(raw_issuer) => Some(self.canonicalize(&raw_issuer).inspect_err(|e| {
                warn!(raw_dn = %raw_issuer, error = %e, "Issuer DN rejected");
            })?),
            None => None,
        };
        debug!(issuer_dn = ?issuer_dn, "Formatted issuer DN");

        session.params = Some(IdentityQuery { user_dn, issuer_dn });
        session.origin = inputs.origin.as_deref().and_then(local_path).map(str::to_string);

        Ok(Redirect::to(self.callback_target(inputs)))
    }

    /// Callback location, in order of preference: the custom URL, the
    /// absolute callback URL, then the callback path.
    fn callback_target(&self, inputs: &TransportInputs) -> String {
        if let Some(url) = self.config.custom_callback_url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        if self.config.use_callback_url {
            if let Some(host) = inputs.header("host") {
                let scheme = inputs
                    .header("x-forwarded-proto")
                    .and_then(|p| p.split(',').next())
                    .map_or("http", str::trim);
                return format!("{scheme}://{host}{}", self.config.callback_path);
            }
            debug!("No Host header, falling back to callback path");
        }
        self.config.callback_path.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Callback phase
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve the recorded query against the directory and store the
    /// resulting identity.
    ///
    /// # Errors
    ///
    /// [`Error::MissingDn`] when no request phase preceded this call, plus
    /// any [`DirectoryLookup`] failure. No identity is stored on error.
    pub async fn callback_phase(&self, session: &mut SessionData) -> Result<Redirect> {
        let query = session.take_query().ok_or(Error::MissingDn)?;
        let record = self.lookup(&query).await?;

        info!(provider = %record.provider, uid = %record.uid, "Client authenticated");
        session.auth = Some(record);

        let target = session.origin.take().unwrap_or_else(|| "/".to_string());
        Ok(Redirect::to(target))
    }

    /// Query the directory for `query` and assemble the identity record.
    pub async fn lookup(&self, query: &IdentityQuery) -> Result<IdentityRecord> {
        let response = self.directory.query(query).await.inspect_err(|e| {
            warn!(user_dn = %query.user_dn, error = %e, "Directory lookup failed");
        })?;

        Ok(IdentityRecord {
            provider: self.config.name.clone(),
            uid: query.user_dn.clone(),
            info: self.mapper.map(&response.decoded),
            extra: IdentityExtra {
                raw_info: response.raw_info(),
            },
        })
    }
}

/// Accept only same-site absolute paths that can go out as a `Location`.
fn local_path(origin: &str) -> Option<&str> {
    (origin.starts_with('/')
        && !origin.starts_with("//")
        && !origin.contains('\\')
        && HeaderValue::from_str(origin).is_ok())
    .then_some(origin)
}
