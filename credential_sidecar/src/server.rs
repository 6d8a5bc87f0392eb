use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use newsloom_core::{AppError, ComponentHealth, HealthSnapshot};
use tracing::error;

use crate::lifecycle::registry::CredentialRegistry;
use crate::lifecycle::state::CredentialState;

#[derive(Clone)]
pub struct AppState {
  pub registry: Arc<CredentialRegistry>,
}

pub fn get_router(registry: Arc<CredentialRegistry>) -> Router {
  let state = AppState { registry };
  Router::new()
    .route("/health", get(health))
    .route("/status/credentials", get(credential_statuses))
    .route("/admin/credentials/{name}/refresh", post(force_refresh))
    .with_state(state)
}

/// Response-side wrapper: internal detail goes to the log, the client gets
/// the kind's safe shape only.
struct ApiError(AppError);

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    error!(
      error_id = %self.0.error_id,
      kind = %self.0.kind,
      detail = %self.0,
      "request failed"
    );
    (self.0.http_status(), Json(self.0.to_public())).into_response()
  }
}

impl From<AppError> for ApiError {
  fn from(err: AppError) -> Self {
    Self(err)
  }
}

async fn health(State(state): State<AppState>) -> Response {
  let mut snapshot = HealthSnapshot::new();
  for status in state.registry.statuses().await {
    let health = match status.state {
      CredentialState::Loaded | CredentialState::Refreshing => ComponentHealth::healthy(),
      CredentialState::Uninitialized => ComponentHealth::degraded("not yet loaded"),
      CredentialState::FailedTransient => ComponentHealth::degraded("last refresh failed"),
      CredentialState::FailedPermanent => ComponentHealth::unhealthy("credential rejected"),
    };
    snapshot = snapshot.with_component(format!("credential/{}", status.name), health);
  }

  let code = if snapshot.is_serving() {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };
  (code, Json(snapshot)).into_response()
}

async fn credential_statuses(State(state): State<AppState>) -> Response {
  Json(state.registry.statuses().await).into_response()
}

async fn force_refresh(
  State(state): State<AppState>,
  Path(name): Path<String>,
) -> Result<Response, ApiError> {
  let manager = state
    .registry
    .get(&name)
    .ok_or_else(|| AppError::not_found(format!("unknown credential {name}")))?;
  manager.force_refresh().await?;
  Ok(Json(manager.current_status().await).into_response())
}
