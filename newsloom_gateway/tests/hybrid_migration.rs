//! End-to-end exercise of the session/CSRF plane against a mock auth
//! service: hybrid routing, migration cut-over, CSRF fail-fast, and
//! degradation when the auth service is unreachable.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use newsloom_core::{ErrorKind, Role};
use newsloom_gateway::auth::legacy::encode_legacy_session_token;
use newsloom_gateway::auth::{
  AuthServiceClient, CircuitState, LegacyAuthBackend, MigrationController, MigrationMode,
  SessionPlane,
};
use newsloom_gateway::config::{AuthConfig, LegacyAuthConfig, SecurityConfig};
use newsloom_gateway::{router_with_state, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

const GATEWAY_SESSION: &str = "session-123";
const VALID_GATEWAY_CSRF: &str = "gw-csrf-valid";

struct AuthServiceCounters {
  validate_calls: AtomicU32,
  csrf_validate_calls: AtomicU32,
  session_active: AtomicBool,
}

impl Default for AuthServiceCounters {
  fn default() -> Self {
    Self {
      validate_calls: AtomicU32::new(0),
      csrf_validate_calls: AtomicU32::new(0),
      session_active: AtomicBool::new(true),
    }
  }
}

type MockState = Arc<AuthServiceCounters>;

async fn mock_validate(State(counters): State<MockState>, headers: HeaderMap) -> impl IntoResponse {
  counters.validate_calls.fetch_add(1, Ordering::SeqCst);
  let token = headers
    .get("x-session-token")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
    .or_else(|| {
      let cookies = headers.get("cookie")?.to_str().ok()?;
      cookies
        .split(';')
        .map(str::trim)
        .find_map(|c| c.strip_prefix("ory_kratos_session="))
        .map(str::to_string)
    });

  match token.as_deref() {
    Some(GATEWAY_SESSION) => (
      StatusCode::OK,
      Json(json!({
        "valid": true,
        "user_id": "u-1",
        "email": "reader@example.com",
        "role": "user",
        "context": { "tenant_id": "acme" },
        "session": {
          "id": "sess-gw-1",
          "user_id": "u-1",
          "active": counters.session_active.load(Ordering::SeqCst),
          "expires_at": Utc::now() + Duration::hours(1),
          "identity_traits": { "email": "reader@example.com" },
        },
      })),
    ),
    _ => (
      StatusCode::UNAUTHORIZED,
      Json(json!({ "valid": false })),
    ),
  }
}

async fn mock_csrf_generate(Json(body): Json<Value>) -> impl IntoResponse {
  if body["session_token"] == GATEWAY_SESSION {
    (
      StatusCode::OK,
      Json(json!({
        "token": VALID_GATEWAY_CSRF,
        "expires_at": Utc::now() + Duration::hours(1),
        "session_id": "sess-gw-1",
      })),
    )
  } else {
    (StatusCode::UNAUTHORIZED, Json(json!({})))
  }
}

async fn mock_csrf_validate(
  State(counters): State<MockState>,
  Json(body): Json<Value>,
) -> Json<Value> {
  counters.csrf_validate_calls.fetch_add(1, Ordering::SeqCst);
  let valid = body["token"] == VALID_GATEWAY_CSRF && body["session_token"] == GATEWAY_SESSION;
  Json(json!({ "valid": valid }))
}

async fn spawn_auth_service() -> (SocketAddr, MockState) {
  let counters: MockState = Arc::new(AuthServiceCounters::default());
  let app = Router::new()
    .route("/v1/auth/validate", get(mock_validate))
    .route("/api/v1/csrf/generate", post(mock_csrf_generate))
    .route("/api/v1/csrf/validate", post(mock_csrf_validate))
    .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
    .with_state(counters.clone());

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app.into_make_service()).await.unwrap();
  });
  (addr, counters)
}

fn legacy_config() -> LegacyAuthConfig {
  LegacyAuthConfig {
    session_secret: "legacy-session-secret".into(),
    csrf_secret: "legacy-csrf-secret".into(),
    csrf_ttl_seconds: 3600,
  }
}

fn gateway_app(auth_url: String, mode: MigrationMode, with_legacy: bool) -> (Router, AppState) {
  let auth_config = AuthConfig {
    service_url: auth_url,
    validate_timeout_ms: 1_000,
    migration_mode: "legacy_only".into(),
    legacy: with_legacy.then(legacy_config),
  };
  let client = AuthServiceClient::new(&auth_config).unwrap();
  let legacy = auth_config.legacy.as_ref().map(LegacyAuthBackend::new);
  let plane = Arc::new(SessionPlane::new(
    client,
    legacy,
    Arc::new(MigrationController::new(mode)),
  ));
  let state = AppState {
    plane,
    security: SecurityConfig::default(),
  };
  (router_with_state(state.clone()), state)
}

fn legacy_session_cookie() -> String {
  let token = encode_legacy_session_token(
    &legacy_config(),
    "u-legacy",
    "old-reader@example.com",
    Role::User,
    "sess-legacy-1",
    Utc::now() + Duration::hours(1),
  )
  .unwrap();
  format!("newsloom_session={token}")
}

#[tokio::test]
async fn hybrid_gateway_request_with_csrf_succeeds() {
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  let response = app
    .oneshot(
      Request::post("/api/user/profile")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .header("x-csrf-token", VALID_GATEWAY_CSRF)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = response.into_body().collect().await.unwrap().to_bytes();
  let parsed: Value = serde_json::from_slice(&body).unwrap();
  assert_eq!(parsed["user_id"], "u-1");
}

#[tokio::test]
async fn legacy_request_works_in_hybrid_and_dies_after_completion() {
  let (addr, _) = spawn_auth_service().await;
  let (app, state) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  // Legacy cookie + legacy CSRF token pass while hybrid.
  let backend = LegacyAuthBackend::new(&legacy_config());
  let csrf = backend.generate_csrf("sess-legacy-1").unwrap();
  let request = Request::post("/api/user/profile")
    .header("cookie", legacy_session_cookie())
    .header("x-csrf-token", csrf.token.as_str())
    .body(Body::empty())
    .unwrap();
  let response = app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  state.plane.migration().complete_migration().unwrap();

  // The identical request is now rejected before any backend consults the
  // legacy material.
  let request = Request::post("/api/user/profile")
    .header("cookie", legacy_session_cookie())
    .header("x-csrf-token", csrf.token.as_str())
    .body(Body::empty())
    .unwrap();
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_csrf_token_fails_fast_without_network() {
  let (addr, counters) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  let response = app
    .oneshot(
      Request::post("/api/user/profile")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::FORBIDDEN);
  assert_eq!(counters.csrf_validate_calls.load(Ordering::SeqCst), 0);
  assert_eq!(counters.validate_calls.load(Ordering::SeqCst), 0);

  let body = response.into_body().collect().await.unwrap().to_bytes();
  let parsed: Value = serde_json::from_slice(&body).unwrap();
  assert_eq!(parsed["code"], "CSRF_INVALID");
  assert_eq!(parsed["message"], "Request could not be verified");
  assert_eq!(parsed["retryable"], false);
}

#[tokio::test]
async fn cross_session_csrf_reuse_is_rejected_like_unknown_token() {
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  let backend = LegacyAuthBackend::new(&legacy_config());
  let other_sessions_token = backend.generate_csrf("sess-somebody-else").unwrap();

  let reused = Request::post("/api/user/profile")
    .header("cookie", legacy_session_cookie())
    .header("x-csrf-token", other_sessions_token.token.as_str())
    .body(Body::empty())
    .unwrap();
  let reused_response = app.clone().oneshot(reused).await.unwrap();

  let garbage = Request::post("/api/user/profile")
    .header("cookie", legacy_session_cookie())
    .header("x-csrf-token", "lg1:bm90LXJlYWw")
    .body(Body::empty())
    .unwrap();
  let garbage_response = app.oneshot(garbage).await.unwrap();

  // Same status, same public body shape: no oracle.
  assert_eq!(reused_response.status(), StatusCode::FORBIDDEN);
  assert_eq!(garbage_response.status(), StatusCode::FORBIDDEN);
  let reused_body: Value = serde_json::from_slice(
    &reused_response.into_body().collect().await.unwrap().to_bytes(),
  )
  .unwrap();
  let garbage_body: Value = serde_json::from_slice(
    &garbage_response.into_body().collect().await.unwrap().to_bytes(),
  )
  .unwrap();
  assert_eq!(reused_body["code"], garbage_body["code"]);
  assert_eq!(reused_body["message"], garbage_body["message"]);
}

#[tokio::test]
async fn transport_failure_falls_back_to_legacy_in_hybrid() {
  // Nothing listens on the auth URL: every gateway call fails transport.
  let (app, _) = gateway_app("http://127.0.0.1:1".into(), MigrationMode::Hybrid, true);

  let backend = LegacyAuthBackend::new(&legacy_config());
  let csrf = backend.generate_csrf("sess-legacy-1").unwrap();
  let response = app
    .oneshot(
      Request::post("/api/user/profile")
        .header(
          "cookie",
          format!(
            "ory_kratos_session={GATEWAY_SESSION}; {}",
            legacy_session_cookie()
          ),
        )
        .header("x-csrf-token", csrf.token.as_str())
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["user_id"], "u-legacy");
}

#[tokio::test]
async fn transport_failure_without_legacy_surfaces_retryable_error() {
  let (app, _) = gateway_app("http://127.0.0.1:1".into(), MigrationMode::Hybrid, false);

  let response = app
    .oneshot(
      Request::get("/api/user/profile")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["retryable"], true);
  assert_eq!(body["error_id"].as_str().unwrap().len(), 8);
}

#[tokio::test]
async fn optional_endpoint_degrades_to_anonymous() {
  // Anonymous request, healthy auth service.
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);
  let response = app
    .oneshot(
      Request::get("/api/feeds/public")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["personalized"], false);

  // Session cookie presented but the auth service is down: the endpoint
  // still serves, anonymously.
  let (app, _) = gateway_app("http://127.0.0.1:1".into(), MigrationMode::Hybrid, false);
  let response = app
    .oneshot(
      Request::get("/api/feeds/public")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["personalized"], false);
}

#[tokio::test]
async fn inactive_session_snapshot_is_rejected_despite_valid_verdict() {
  let (addr, counters) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::GatewayOnly, false);
  counters.session_active.store(false, Ordering::SeqCst);

  let response = app
    .oneshot(
      Request::get("/api/user/profile")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["code"], "SESSION_NOT_FOUND");
  assert_eq!(body["message"], "Session not found or expired");
}

#[tokio::test]
async fn tenant_scope_is_enforced_on_header_sessions() {
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  let matching = app
    .clone()
    .oneshot(
      Request::get("/api/user/profile")
        .header("x-session-token", GATEWAY_SESSION)
        .header("x-tenant-id", "acme")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(matching.status(), StatusCode::OK);

  let mismatched = app
    .oneshot(
      Request::get("/api/user/profile")
        .header("x-session-token", GATEWAY_SESSION)
        .header("x-tenant-id", "globex")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(mismatched.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn circuit_opens_after_repeated_transport_failures() {
  let auth_config = AuthConfig {
    service_url: "http://127.0.0.1:1".into(),
    validate_timeout_ms: 500,
    migration_mode: "hybrid".into(),
    legacy: None,
  };
  let client = AuthServiceClient::new(&auth_config).unwrap();

  for _ in 0..5 {
    let _ = client.validate_session("tok").await;
  }
  assert_eq!(client.circuit_state(), CircuitState::Open);

  // Open circuit short-circuits without touching the network, still as a
  // transport-class failure so hybrid fallback keeps working.
  let err = client.validate_session("tok").await.unwrap_err();
  assert!(err.is_kind(ErrorKind::ServiceUnavailable));
  assert_eq!(err.context.get("circuit").map(String::as_str), Some("open"));
}

#[tokio::test]
async fn admin_surface_drives_the_migration_state_machine() {
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::LegacyOnly, true);

  let status = app
    .clone()
    .oneshot(
      Request::get("/admin/csrf/migration/status")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(status.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&status.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["migration_mode"]["mode"], "legacy_only");

  let enable = app
    .clone()
    .oneshot(
      Request::put("/admin/csrf/migration/mode")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"enabled":true}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(enable.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&enable.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["migration_mode"]["mode"], "hybrid");

  let complete = app
    .clone()
    .oneshot(
      Request::post("/admin/csrf/migration/complete")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(complete.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&complete.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["migration_mode"]["mode"], "gateway_only");
  assert_eq!(body["migration_completed"], true);

  // Any further mode change is a conflict.
  let rollback = app
    .oneshot(
      Request::put("/admin/csrf/migration/mode")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"enabled":false}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(rollback.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn csrf_issuance_relays_from_the_owning_backend() {
  let (addr, _) = spawn_auth_service().await;
  let (app, _) = gateway_app(format!("http://{addr}"), MigrationMode::Hybrid, true);

  let response = app
    .oneshot(
      Request::post("/api/csrf/token")
        .header("cookie", format!("ory_kratos_session={GATEWAY_SESSION}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body: Value =
    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
  assert_eq!(body["token"], VALID_GATEWAY_CSRF);
}
