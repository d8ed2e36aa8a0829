//! Per-client state shared by the two phases.
//!
//! The request phase leaves an [`IdentityQuery`] behind; the callback phase
//! consumes it and leaves an [`IdentityRecord`]. Nothing else couples them.

use serde::{Deserialize, Serialize};

use super::directory::IdentityQuery;
use super::info::IdentityRecord;

/// Where a client is in the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Nothing recorded yet
    Start,
    /// Request phase done, callback pending
    AwaitingCallback,
    /// Identity recorded
    Authenticated,
}

/// Session contents owned by the strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Canonical DNs written by the request phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<IdentityQuery>,
    /// Identity written by a successful callback phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<IdentityRecord>,
    /// Local path to return to after the callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SessionData {
    /// Current flow state. A pending query wins over an older identity.
    #[must_use]
    pub fn state(&self) -> FlowState {
        if self.params.is_some() {
            FlowState::AwaitingCallback
        } else if self.auth.is_some() {
            FlowState::Authenticated
        } else {
            FlowState::Start
        }
    }

    /// Remove and return the pending query.
    pub fn take_query(&mut self) -> Option<IdentityQuery> {
        self.params.take()
    }

    /// Whether the session holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_none() && self.auth.is_none() && self.origin.is_none()
    }
}
