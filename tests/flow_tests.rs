//! End-to-end authentication flow tests
//!
//! Runs both phases through the axum router against a stub directory
//! listening on an ephemeral port:
//! - DN from headers and from a proxy certificate header
//! - JSON and XML directories
//! - directory rejection, unreachable directory, timeouts
//! - session handling between phases: rotation, unknown ids, expiry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use dice_auth::Error;
use dice_auth::config::{DiceConfig, DiceOptions};
use dice_auth::dice::{DiceStrategy, IdentityQuery, ResponseFormat};
use dice_auth::server::{AppState, SessionStore, create_router};

const TWILIGHT_DN: &str = "CN=TWILIGHT SPARKLE,OU=C001,O=PRINCESSES OF CELESTIA,C=US";
const RAW_TWILIGHT: &str = "/C=US/O=Princesses of Celestia/OU=C001/CN=Twilight Sparkle";
/// Subject and issuer `/DC=org/DC=ruby-lang/CN=Ruby certificate rbcert`.
const RBCERT_PEM: &str = include_str!("fixtures/ruby_rbcert.pem");

// ── stub directory ──────────────────────────────────────────────────────────

async fn directory_handler(
    Path((dn, file)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if headers.get("x-xsrf-useprotection").and_then(|v| v.to_str().ok()) != Some("false") {
        return (StatusCode::BAD_REQUEST, "missing xsrf header").into_response();
    }

    if dn == "CN=SLOW" {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    if dn != TWILIGHT_DN {
        return (StatusCode::NOT_FOUND, "no such user").into_response();
    }

    match file.as_str() {
        "info.json" => Json(json!({
            "dn": "cn=Twilight Sparkle,ou=c001,o=princesses of celestia,c=us",
            "email": "twilight@example.org",
            "firstName": "Twilight",
            "lastName": "Sparkle",
            "fullName": "Princess Twilight Sparkle",
            "visas": ["EQUESTRIA", "CLOUDSDALE"],
            "issuerSeen": query.get("issuerDN"),
            "acceptSeen": headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
        }))
        .into_response(),
        "info.xml" => (
            [(header::CONTENT_TYPE, "application/xml")],
            r#"<?xml version="1.0"?>
<userinfo>
  <dn>cn=Twilight Sparkle,ou=c001,o=princesses of celestia,c=us</dn>
  <email>twilight@example.org</email>
  <fullName>Princess Twilight Sparkle</fullName>
  <visas type="array"><visa>EQUESTRIA</visa></visas>
</userinfo>"#,
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the stub directory, returning its base URL.
async fn spawn_directory() -> String {
    let app = Router::new().route("/users/{dn}/{file}", get(directory_handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// URL of a port nothing listens on.
async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── helpers ─────────────────────────────────────────────────────────────────

fn strategy(options: DiceOptions) -> DiceStrategy {
    DiceStrategy::new(DiceConfig::from_options(options).unwrap()).unwrap()
}

fn app(strategy: DiceStrategy) -> Router {
    app_with_state(strategy).0
}

fn app_with_state(strategy: DiceStrategy) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(strategy, "dice_session"));
    (create_router(Arc::clone(&state), Duration::from_secs(30)), state)
}

fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap()
}

/// `name=value` part of the Set-Cookie header.
fn cookie(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap()
        .to_string()
}

/// Session id carried by a `name=value` cookie.
fn session_id(cookie: &str) -> &str {
    cookie.strip_prefix("dice_session=").unwrap()
}

// ── full flow ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn header_dn_flow_records_identity() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    // Request phase
    let response = app
        .clone()
        .oneshot(get_request(
            "/auth/dice?origin=/welcome",
            &[
                ("ssl-client-s-dn", RAW_TWILIGHT),
                ("ssl-client-i-dn", "/C=US/O=Equestria/CN=Celestia CA"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/auth/dice/callback");
    let session = cookie(&response);

    // Callback phase
    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/callback", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/welcome");
    let session = cookie(&response);

    // Stored identity
    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/identity", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let identity = body_json(response).await;

    assert_eq!(identity["provider"], json!("dice"));
    assert_eq!(identity["uid"], json!(TWILIGHT_DN));
    assert_eq!(identity["info"]["common_name"], json!("Twilight Sparkle"));
    assert_eq!(identity["info"]["name"], json!("Twilight Sparkle"));
    assert_eq!(identity["info"]["first_name"], json!("Twilight"));
    assert_eq!(identity["info"]["grant_by"], Value::Null);
    assert_eq!(identity["info"]["likely_npe?"], json!(false));
    assert_eq!(identity["info"]["primary_visa?"], json!(false));
    assert_eq!(
        identity["info"]["issuer_seen"],
        json!("CN=CELESTIA CA,O=EQUESTRIA,C=US")
    );
    assert_eq!(identity["info"]["accept_seen"], json!("application/json"));
    assert!(identity["extra"]["raw_info"].is_string());
}

#[tokio::test]
async fn certificate_header_flow_uses_certificate_dn() {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "US");
    dn.push(DnType::OrganizationName, "Princesses of Celestia");
    dn.push(DnType::OrganizationalUnitName, "C001");
    dn.push(DnType::CommonName, "Twilight Sparkle");
    params.distinguished_name = dn;
    let key_pair = KeyPair::generate().unwrap();
    let pem = params.self_signed(&key_pair).unwrap().pem().replace(['\r', '\n'], " ");

    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    // GIVEN: a flattened PEM header and a conflicting DN header
    let response = app
        .clone()
        .oneshot(get_request(
            "/auth/dice",
            &[("ssl-client-cert", pem.trim()), ("ssl-client-s-dn", "/CN=someone else")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let session = cookie(&response);

    // WHEN: completing the callback
    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/callback", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");
    let session = cookie(&response);

    // THEN: the certificate subject was looked up
    let identity = body_json(
        app.oneshot(get_request("/auth/dice/identity", &[("cookie", &session)]))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(identity["uid"], json!(TWILIGHT_DN));
}

#[tokio::test]
async fn ruby_certificate_subject_is_stored_canonically() {
    let base = spawn_directory().await;
    let (app, state) = app_with_state(strategy(DiceOptions::new(&base, "/users")));

    let pem = RBCERT_PEM.replace(['\r', '\n'], " ");
    let response = app
        .oneshot(get_request("/auth/dice", &[("ssl-client-cert", pem.trim())]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let session = state
        .sessions
        .load(session_id(&cookie(&response)))
        .unwrap();
    let params = session.params.unwrap();
    assert_eq!(params.user_dn, "CN=RUBY CERTIFICATE RBCERT,DC=RUBY-LANG,DC=ORG");
    assert_eq!(
        params.issuer_dn.as_deref(),
        Some("CN=RUBY CERTIFICATE RBCERT,DC=RUBY-LANG,DC=ORG")
    );
}

#[tokio::test]
async fn xml_directory_is_decoded() {
    let base = spawn_directory().await;
    let mut options = DiceOptions::new(&base, "/users");
    options.format = ResponseFormat::Xml;
    options.primary_visa = Some("EQUESTRIA".to_string());
    let strategy = strategy(options);

    let record = strategy.lookup(&IdentityQuery::new(TWILIGHT_DN)).await.unwrap();

    assert_eq!(record.info.email, json!("twilight@example.org"));
    assert_eq!(record.info.full_name, json!("Princess Twilight Sparkle"));
    assert_eq!(record.info.visas, json!(["EQUESTRIA"]));
    assert!(record.info.primary_visa);
    assert_eq!(record.info.likely_npe, Some(false));
    assert!(record.extra.raw_info.as_str().unwrap().contains("<userinfo>"));
}

// ── failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_dn_is_invalid_credentials() {
    let base = spawn_directory().await;
    let strategy = strategy(DiceOptions::new(&base, "/users"));

    let err = strategy
        .lookup(&IdentityQuery::new("CN=NOBODY"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidCredentials { status: 404 }));
}

#[tokio::test]
async fn rejected_callback_renders_error_and_stores_nothing() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app
        .clone()
        .oneshot(get_request("/auth/dice", &[("ssl-client-s-dn", "/CN=Nobody")]))
        .await
        .unwrap();
    let session = cookie(&response);

    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/callback", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("invalid_credentials"));

    let response = app
        .oneshot(get_request("/auth/dice/identity", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreachable_directory_is_network_failure() {
    let base = closed_port().await;
    let strategy = strategy(DiceOptions::new(&base, "/users"));

    let err = strategy
        .lookup(&IdentityQuery::new(TWILIGHT_DN))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NetworkFailure(_)));
}

#[tokio::test]
async fn slow_directory_times_out() {
    let base = spawn_directory().await;
    let mut options = DiceOptions::new(&base, "/users");
    options.timeout = Duration::from_millis(200);
    let strategy = strategy(options);

    let err = strategy
        .lookup(&IdentityQuery::new("CN=SLOW"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NetworkFailure(_)));
}

#[tokio::test]
async fn missing_dn_fails_without_a_session() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app.oneshot(get_request("/auth/dice", &[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("missing_dn"));
    assert_eq!(body["message"], json!("You need a valid DN to authenticate."));
}

#[tokio::test]
async fn callback_without_request_phase_is_missing_dn() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app
        .oneshot(get_request("/auth/dice/callback", &[("cookie", "dice_session=unknown")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], json!("missing_dn"));
}

#[tokio::test]
async fn invalid_dn_is_rejected() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app
        .oneshot(get_request("/auth/dice", &[("ssl-client-s-dn", "O=Equestria,C=US")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], json!("invalid_dn"));
}

// ── sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn planted_session_id_is_not_adopted() {
    let base = spawn_directory().await;
    let (app, state) = app_with_state(strategy(DiceOptions::new(&base, "/users")));

    // GIVEN: a session id the server never issued
    let response = app
        .oneshot(get_request(
            "/auth/dice",
            &[
                ("ssl-client-s-dn", RAW_TWILIGHT),
                ("cookie", "dice_session=chosen-by-someone-else"),
            ],
        ))
        .await
        .unwrap();

    // THEN: the DN lands in a freshly issued session
    assert_eq!(response.status(), StatusCode::FOUND);
    let issued = cookie(&response);
    assert_ne!(issued, "dice_session=chosen-by-someone-else");
    assert_eq!(state.sessions.load("chosen-by-someone-else"), None);
    let session = state.sessions.load(session_id(&issued)).unwrap();
    assert_eq!(session.params.unwrap().user_dn, TWILIGHT_DN);
}

#[tokio::test]
async fn session_id_rotates_after_each_phase() {
    let base = spawn_directory().await;
    let (app, state) = app_with_state(strategy(DiceOptions::new(&base, "/users")));

    // Existing session from an earlier request phase
    let first = cookie(
        &app.clone()
            .oneshot(get_request("/auth/dice", &[("ssl-client-s-dn", RAW_TWILIGHT)]))
            .await
            .unwrap(),
    );

    // Repeating the request phase moves the session to a new id
    let response = app
        .clone()
        .oneshot(get_request(
            "/auth/dice",
            &[("ssl-client-s-dn", RAW_TWILIGHT), ("cookie", &first)],
        ))
        .await
        .unwrap();
    let second = cookie(&response);
    assert_ne!(second, first);
    assert_eq!(state.sessions.load(session_id(&first)), None);

    // The callback moves it again
    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/callback", &[("cookie", &second)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let third = cookie(&response);
    assert_ne!(third, second);

    // Only the newest id reaches the identity
    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/identity", &[("cookie", &second)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app
        .oneshot(get_request("/auth/dice/identity", &[("cookie", &third)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.sessions.len(), 1);
}

#[tokio::test]
async fn identity_reports_pending_callback() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let session = cookie(
        &app.clone()
            .oneshot(get_request("/auth/dice", &[("ssl-client-s-dn", RAW_TWILIGHT)]))
            .await
            .unwrap(),
    );

    let response = app
        .clone()
        .oneshot(get_request("/auth/dice/identity", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("not_authenticated"));
    assert_eq!(body["state"], json!("awaiting_callback"));

    let response = app
        .oneshot(get_request("/auth/dice/identity", &[]))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["state"], json!("start"));
}

#[tokio::test]
async fn expired_session_is_not_resumed() {
    let base = spawn_directory().await;
    let state = Arc::new(AppState::with_sessions(
        strategy(DiceOptions::new(&base, "/users")),
        "dice_session",
        Arc::new(SessionStore::new(Duration::ZERO)),
    ));
    let app = create_router(Arc::clone(&state), Duration::from_secs(30));

    let session = cookie(
        &app.clone()
            .oneshot(get_request("/auth/dice", &[("ssl-client-s-dn", RAW_TWILIGHT)]))
            .await
            .unwrap(),
    );

    let response = app
        .oneshot(get_request("/auth/dice/callback", &[("cookie", &session)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], json!("missing_dn"));
    assert!(state.sessions.is_empty());
}

// ── routing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn other_provider_names_are_not_found() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app
        .oneshot(get_request("/auth/casport", &[("ssl-client-s-dn", RAW_TWILIGHT)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], json!("unknown_provider"));
}

#[tokio::test]
async fn health_reports_provider() {
    let base = spawn_directory().await;
    let app = app(strategy(DiceOptions::new(&base, "/users")));

    let response = app.oneshot(get_request("/health", &[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["provider"], json!("dice"));
}
