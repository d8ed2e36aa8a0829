//! dice-auth Library
//!
//! Authenticates clients by the Distinguished Name of their X.509
//! certificate: the DN is taken from the TLS layer or a reverse-proxy
//! header, canonicalized into the attribute order the directory expects,
//! and looked up in a DN-keyed CAS/directory service whose answer becomes a
//! normalized identity record.
//!
//! # Features
//!
//! - **DN canonicalization**: slash or comma DNs, any orientation
//!   (see the `dice-core` crate)
//! - **Two-phase flow**: request phase records the DN, callback phase
//!   resolves it, coupled only through session state
//! - **JSON and XML directories** behind one decoder interface
//! - **Identity mapping**: snake-cased fields, display name, primary visa,
//!   non-person-entity heuristics
//! - **Host**: axum server with in-memory sessions and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod dice;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?;
        }
    }

    Ok(())
}
