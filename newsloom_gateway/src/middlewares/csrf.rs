use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use newsloom_core::observability::metrics::AuthPlaneMetrics;
use newsloom_core::AppError;

use crate::auth::legacy::LEGACY_CSRF_PREFIX;
use crate::auth::session::{cookie_value, GATEWAY_SESSION_COOKIE, LEGACY_SESSION_COOKIE};
use crate::error::GatewayError;
use crate::AppState;

const CSRF_TOKEN_HEADER: &str = "x-csrf-token";
const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Outermost CSRF gate: a mutating request without a token is rejected
/// here, before session validation or any other backend call.
pub async fn csrf_presence_middleware(req: Request, next: Next) -> Result<Response, GatewayError> {
  if is_mutating(req.method()) && csrf_token_of(&req).is_none() {
    AuthPlaneMetrics::csrf_validation("missing_token");
    return Err(
      AppError::csrf_invalid("mutating request without csrf token")
        .with_component("csrf_middleware")
        .with_context("attack_class", "missing_token")
        .into(),
    );
  }
  Ok(next.run(req).await)
}

/// Full CSRF verification for mutating verbs, behind session validation.
pub async fn csrf_middleware(
  State(state): State<AppState>,
  req: Request,
  next: Next,
) -> Result<Response, GatewayError> {
  if !is_mutating(req.method()) {
    return Ok(next.run(req).await);
  }

  let Some(token) = csrf_token_of(&req) else {
    // Presence is enforced by the outer gate; this guards direct use of
    // the middleware without it.
    return Err(
      AppError::csrf_invalid("mutating request without csrf token")
        .with_component("csrf_middleware")
        .with_context("attack_class", "missing_token")
        .into(),
    );
  };

  let session_token = session_token_for(&req, &token)
    .ok_or_else(|| GatewayError(AppError::unauthorized("csrf check without a session")))?;
  state.plane.validate_csrf_token(&token, &session_token).await?;
  Ok(next.run(req).await)
}

fn is_mutating(method: &Method) -> bool {
  matches!(
    *method,
    Method::POST | Method::PUT | Method::PATCH | Method::DELETE
  )
}

fn csrf_token_of(req: &Request) -> Option<String> {
  let token = req
    .headers()
    .get(CSRF_TOKEN_HEADER)
    .and_then(|v| v.to_str().ok())?;
  if token.is_empty() {
    return None;
  }
  Some(token.to_string())
}

/// The session credential the CSRF token must be bound to. Legacy-format
/// tokens bind to the legacy session cookie; everything else follows the
/// session middleware's precedence.
fn session_token_for(req: &Request, csrf_token: &str) -> Option<String> {
  let cookie_header = req
    .headers()
    .get("cookie")
    .and_then(|v| v.to_str().ok())
    .unwrap_or("");

  if csrf_token.starts_with(LEGACY_CSRF_PREFIX) {
    return cookie_value(cookie_header, LEGACY_SESSION_COOKIE)
      .or_else(|| header_value(req, SESSION_TOKEN_HEADER));
  }

  header_value(req, SESSION_TOKEN_HEADER)
    .or_else(|| cookie_value(cookie_header, GATEWAY_SESSION_COOKIE))
    .or_else(|| cookie_value(cookie_header, LEGACY_SESSION_COOKIE))
}

fn header_value(req: &Request, name: &str) -> Option<String> {
  req
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
}
