//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::debug;

use super::sessions::{SessionStore, session_cookie, session_id_from_headers};
use crate::Error;
use crate::dice::{DiceStrategy, PeerCertificate, Redirect, SessionData, TransportInputs};

/// Shared application state
pub struct AppState {
    /// Authentication strategy
    pub strategy: DiceStrategy,
    /// Session store
    pub sessions: Arc<SessionStore>,
    /// Name of the session cookie
    pub session_cookie: String,
}

impl AppState {
    /// State with an empty session store and the default session TTL.
    #[must_use]
    pub fn new(strategy: DiceStrategy, session_cookie: impl Into<String>) -> Self {
        Self::with_sessions(strategy, session_cookie, Arc::new(SessionStore::default()))
    }

    /// State around an existing session store.
    #[must_use]
    pub fn with_sessions(
        strategy: DiceStrategy,
        session_cookie: impl Into<String>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            strategy,
            sessions,
            session_cookie: session_cookie.into(),
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/{name}", get(request_handler))
        .route("/auth/{name}/callback", get(callback_handler))
        .route("/auth/{name}/identity", get(identity_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RequestParams {
    origin: Option<String>,
}

/// Session id from the cookie, or a new one the response must set.
struct SessionHandle {
    id: String,
    is_new: bool,
    stored: bool,
}

impl SessionHandle {
    /// The stored session named by the cookie, or a fresh one. Ids the store
    /// does not hold are never adopted.
    fn resolve(state: &AppState, headers: &HeaderMap) -> (Self, SessionData) {
        if let Some(id) = session_id_from_headers(headers, &state.session_cookie) {
            if let Some(session) = state.sessions.load(&id) {
                let handle = Self {
                    id,
                    is_new: false,
                    stored: true,
                };
                return (handle, session);
            }
            debug!("Unknown or expired session id, starting a new session");
        }
        (Self::fresh(), SessionData::default())
    }

    fn fresh() -> Self {
        Self {
            id: SessionStore::new_id(),
            is_new: true,
            stored: false,
        }
    }

    /// Move to a new id once the session gains a DN or an identity.
    fn rotate(&mut self, state: &AppState) {
        if !self.is_new {
            state.sessions.remove(&self.id);
        }
        *self = Self::fresh();
    }

    fn save(&mut self, state: &AppState, session: SessionData) {
        self.stored = !session.is_empty();
        state.sessions.save(&self.id, session);
    }

    /// Attach the session cookie to a fresh session's response.
    fn finish(&self, state: &AppState, mut response: Response) -> Response {
        if self.is_new && self.stored {
            if let Some(cookie) = session_cookie(&state.session_cookie, &self.id) {
                response.headers_mut().insert(header::SET_COOKIE, cookie);
            }
        }
        response
    }
}

fn redirect_response(redirect: &Redirect) -> Response {
    match HeaderValue::from_str(&redirect.location) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => Error::Internal(format!("Invalid redirect target: {e}")).into_response(),
    }
}

fn unknown_provider(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "unknown_provider",
            "message": format!("No authentication provider named '{name}'")
        })),
    )
        .into_response()
}

/// GET /auth/{name}: request phase
async fn request_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<RequestParams>,
    request: Request,
) -> Response {
    if name != state.strategy.name() {
        return unknown_provider(&name);
    }

    let (mut handle, mut session) = SessionHandle::resolve(&state, request.headers());

    let peer_certificate = request
        .extensions()
        .get::<PeerCertificate>()
        .map(|cert| cert.0.clone());
    let (parts, _body) = request.into_parts();
    let mut inputs = TransportInputs::from_headers(parts.headers);
    inputs.peer_certificate = peer_certificate;
    inputs.origin = params.origin;

    let response = match state.strategy.request_phase(&inputs, &mut session) {
        Ok(redirect) => {
            handle.rotate(&state);
            handle.save(&state, session);
            redirect_response(&redirect)
        }
        Err(e) => e.into_response(),
    };
    handle.finish(&state, response)
}

/// GET /auth/{name}/callback: callback phase
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    if name != state.strategy.name() {
        return unknown_provider(&name);
    }

    let (mut handle, mut session) = SessionHandle::resolve(&state, request.headers());

    let result = state.strategy.callback_phase(&mut session).await;
    if result.is_ok() {
        handle.rotate(&state);
    }
    // The pending query is consumed whether or not the lookup succeeded
    handle.save(&state, session);

    let response = match result {
        Ok(redirect) => redirect_response(&redirect),
        Err(e) => e.into_response(),
    };
    handle.finish(&state, response)
}

/// GET /auth/{name}/identity: identity recorded for this session
async fn identity_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    if name != state.strategy.name() {
        return unknown_provider(&name);
    }

    let (_, session) = SessionHandle::resolve(&state, request.headers());
    let flow_state = session.state();
    match session.auth {
        Some(record) => Json(record).into_response(),
        None => {
            debug!(state = ?flow_state, "No identity for session");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "not_authenticated",
                    "message": "No identity recorded for this session",
                    "state": flow_state
                })),
            )
                .into_response()
        }
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.strategy.name(),
        "sessions": state.sessions.len()
    }))
}
