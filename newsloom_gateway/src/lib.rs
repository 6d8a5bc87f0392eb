pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middlewares;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use axum::Router;
use newsloom_core::AppError;

pub use auth::{
  AuthServiceClient, LegacyAuthBackend, MigrationController, MigrationMode, SessionPlane,
};
pub use config::GatewayConfig;
pub use error::GatewayError;

use crate::config::SecurityConfig;

#[derive(Clone)]
pub struct AppState {
  pub plane: Arc<SessionPlane>,
  pub security: SecurityConfig,
}

/// Assemble the gateway router: public health, the admin migration
/// surface, optional-auth reads, and the authenticated API behind the
/// session and CSRF middlewares.
pub fn get_router(config: &GatewayConfig) -> Result<Router, AppError> {
  let client = AuthServiceClient::new(&config.auth)?;
  let legacy = config.auth.legacy.as_ref().map(LegacyAuthBackend::new);
  let migration = Arc::new(MigrationController::from_mode_str(
    &config.auth.migration_mode,
  )?);
  let plane = Arc::new(SessionPlane::new(client, legacy, migration));

  Ok(router_with_state(AppState {
    plane,
    security: config.security.clone(),
  }))
}

fn cors_layer(security: &SecurityConfig) -> Option<tower_http::cors::CorsLayer> {
  if security.cors_allowed_origins.is_empty() {
    return None;
  }
  let origins: Vec<axum::http::HeaderValue> = security
    .cors_allowed_origins
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
  Some(
    tower_http::cors::CorsLayer::new()
      .allow_origin(origins)
      .allow_methods([
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::PUT,
        axum::http::Method::PATCH,
        axum::http::Method::DELETE,
      ])
      .allow_headers([
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderName::from_static("x-csrf-token"),
        axum::http::HeaderName::from_static("x-session-token"),
        axum::http::HeaderName::from_static("x-tenant-id"),
      ])
      .allow_credentials(true),
  )
}

/// Router assembly from a pre-built state, shared with the tests that
/// inject their own plane.
pub fn router_with_state(state: AppState) -> Router {
  // Execution order for mutating requests: the CSRF presence gate (no
  // token, no backend call), then session validation, then full CSRF
  // verification against the session.
  let authenticated = Router::new()
    .route(
      "/api/user/profile",
      get(handlers::user::get_profile).post(handlers::user::update_profile),
    )
    .layer(from_fn_with_state(state.clone(), middlewares::csrf_middleware))
    .layer(from_fn_with_state(
      state.clone(),
      middlewares::require_session_middleware,
    ))
    .layer(from_fn(middlewares::csrf_presence_middleware));

  let optional = Router::new()
    .route("/api/feeds/public", get(handlers::user::public_feeds))
    .layer(from_fn_with_state(
      state.clone(),
      middlewares::optional_session_middleware,
    ));

  let admin = Router::new()
    .route("/admin/csrf/migration/status", get(handlers::admin::migration_status))
    .route("/admin/csrf/migration/mode", put(handlers::admin::set_migration_mode))
    .route(
      "/admin/csrf/migration/complete",
      post(handlers::admin::complete_migration),
    );

  let mut router = Router::new()
    .route("/health", get(handlers::health::health))
    .route("/api/csrf/token", post(handlers::csrf::issue_csrf_token))
    .merge(authenticated)
    .merge(optional)
    .merge(admin)
    .layer(from_fn_with_state(
      state.clone(),
      middlewares::security_headers_middleware,
    ));

  if let Some(cors) = cors_layer(&state.security) {
    router = router.layer(cors);
  }

  router
    .layer(from_fn(middlewares::request_id_middleware))
    .layer(from_fn(middlewares::panic_guard_middleware))
    .with_state(state)
}
