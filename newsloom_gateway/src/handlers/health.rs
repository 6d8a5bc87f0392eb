use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use newsloom_core::{ComponentHealth, HealthSnapshot};

use crate::AppState;

/// `GET /health`. An unreachable or non-ok auth service degrades the
/// gateway; it does not take it out of rotation.
pub async fn health(State(state): State<AppState>) -> Response {
  let auth_component = match state.plane.auth_service_healthy().await {
    Ok(true) => ComponentHealth::healthy(),
    Ok(false) => ComponentHealth::degraded("auth service reports non-ok status"),
    Err(e) => ComponentHealth::degraded(format!(
      "auth service unreachable ({}, circuit {:?})",
      e.kind,
      state.plane.auth_circuit_state()
    )),
  };

  let snapshot = HealthSnapshot::new().with_component("auth_service", auth_component);
  let code = if snapshot.is_serving() {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };
  (code, Json(snapshot)).into_response()
}
