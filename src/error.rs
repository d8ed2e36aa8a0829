//! Error types for dice-auth

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dice_core::DnError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias for dice-auth
pub type Result<T> = std::result::Result<T, Error>;

/// dice-auth errors
#[derive(Error, Debug)]
pub enum Error {
    /// A required strategy option is absent (deployment error)
    #[error("dice-auth error: {0} is required")]
    MissingConfiguration(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No subject DN could be extracted from the request
    #[error("You need a valid DN to authenticate.")]
    MissingDn,

    /// DN present but could not be canonicalized
    #[error("Invalid DN: {0}")]
    InvalidDn(#[from] DnError),

    /// Directory unreachable, timed out, or the connection failed
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Directory rejected the lookup
    #[error("Invalid credentials: directory returned HTTP {status}")]
    InvalidCredentials {
        /// HTTP status returned by the directory
        status: u16,
    },

    /// Directory response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error kind, used in failure responses.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingConfiguration(_) => "missing_configuration",
            Self::Config(_) => "configuration",
            Self::MissingDn => "missing_dn",
            Self::InvalidDn(_) => "invalid_dn",
            Self::NetworkFailure(_) => "network_failure",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::Decode(_) => "decode_error",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the host answers with for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingDn | Self::InvalidDn(_) | Self::InvalidCredentials { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::NetworkFailure(_) | Self::Decode(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error belongs to a single authentication attempt rather
    /// than to the deployment.
    #[must_use]
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingDn
                | Self::InvalidDn(_)
                | Self::NetworkFailure(_)
                | Self::InvalidCredentials { .. }
                | Self::Decode(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_attempt_failure() {
            warn!(kind = self.kind(), error = %self, "Authentication attempt failed");
        } else {
            error!(kind = self.kind(), error = %self, "Request failed");
        }

        (
            status,
            Json(json!({
                "error": self.kind(),
                "message": self.to_string()
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configuration_names_the_option() {
        let err = Error::MissingConfiguration("cas_server");
        assert_eq!(err.to_string(), "dice-auth error: cas_server is required");
        assert_eq!(err.kind(), "missing_configuration");
        assert!(!err.is_attempt_failure());
    }

    #[test]
    fn missing_dn_is_unauthorized() {
        let err = Error::MissingDn;
        assert_eq!(err.to_string(), "You need a valid DN to authenticate.");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.is_attempt_failure());
    }

    #[test]
    fn dn_errors_convert_to_invalid_dn() {
        let err: Error = DnError::Empty.into();
        assert_eq!(err.kind(), "invalid_dn");
        assert_eq!(err.to_string(), "Invalid DN: distinguished name is empty");
    }

    #[test]
    fn directory_failures_map_to_distinct_statuses() {
        assert_eq!(
            Error::InvalidCredentials { status: 404 }.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::NetworkFailure("timed out".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
