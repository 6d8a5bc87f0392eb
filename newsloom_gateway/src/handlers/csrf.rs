use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use newsloom_core::{AppError, CsrfTokenRecord};

use crate::auth::session::{cookie_value, GATEWAY_SESSION_COOKIE, LEGACY_SESSION_COOKIE};
use crate::error::GatewayError;
use crate::AppState;

/// `POST /api/csrf/token`: issue a CSRF token bound to the caller's
/// session, relayed from whichever backend currently owns sessions.
pub async fn issue_csrf_token(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Json<CsrfTokenRecord>, GatewayError> {
  let session_token = headers
    .get("x-session-token")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
    .or_else(|| {
      let cookie_header = headers.get("cookie")?.to_str().ok()?;
      cookie_value(cookie_header, GATEWAY_SESSION_COOKIE)
        .or_else(|| cookie_value(cookie_header, LEGACY_SESSION_COOKIE))
    })
    .ok_or_else(|| GatewayError(AppError::unauthorized("csrf issuance without a session")))?;

  let record = state.plane.generate_csrf_token(&session_token).await?;
  Ok(Json(record))
}
