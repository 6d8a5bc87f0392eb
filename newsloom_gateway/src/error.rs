use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use newsloom_core::AppError;
use thiserror::Error;
use tracing::{error, warn};

/// Gateway-side wrapper so `AppError` can flow out of handlers with `?`.
///
/// The response carries only the kind's public shape; the internal message
/// and cause chain go to the log, keyed by `error_id`.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct GatewayError(#[from] pub AppError);

impl IntoResponse for GatewayError {
  fn into_response(self) -> Response {
    let err = self.0;
    if err.http_status().is_server_error() {
      error!(
        error_id = %err.error_id,
        kind = %err.kind,
        component = err.component.unwrap_or("gateway"),
        detail = %err,
        "request failed"
      );
    } else {
      warn!(
        error_id = %err.error_id,
        kind = %err.kind,
        detail = %err,
        "request rejected"
      );
    }
    (err.http_status(), Json(err.to_public())).into_response()
  }
}

/// Body served when a handler panics: a fresh `INTERNAL` error with its
/// own id. The panic payload itself is logged by the containment
/// middleware and never surfaced.
pub fn panic_response() -> Response {
  let err = AppError::internal("handler panicked").with_component("gateway");
  error!(error_id = %err.error_id, "panic converted to INTERNAL");
  (StatusCode::INTERNAL_SERVER_ERROR, Json(err.to_public())).into_response()
}
