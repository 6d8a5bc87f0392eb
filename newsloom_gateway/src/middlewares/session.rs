use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use newsloom_core::{AppError, UserContext};

use crate::error::GatewayError;
use crate::AppState;

const SESSION_TOKEN_HEADER: &str = "x-session-token";
const TENANT_HEADER: &str = "x-tenant-id";

/// Extension inserted by [`optional_session_middleware`]; `None` means the
/// request is anonymous and the handler decides what that implies.
#[derive(Debug, Clone)]
pub struct OptionalUserContext(pub Option<UserContext>);

/// Strict authentication: no valid session, no handler.
pub async fn require_session_middleware(
  State(state): State<AppState>,
  mut req: Request,
  next: Next,
) -> Result<Response, GatewayError> {
  let context = authenticate(&state, req.headers()).await?;
  req.extensions_mut().insert(context);
  Ok(next.run(req).await)
}

/// Declared-optional authentication for read endpoints that can serve
/// anonymous traffic when the auth service is unreachable.
pub async fn optional_session_middleware(
  State(state): State<AppState>,
  mut req: Request,
  next: Next,
) -> Result<Response, GatewayError> {
  let headers = req.headers().clone();
  let context = match header_str(&headers, SESSION_TOKEN_HEADER) {
    Some(token) => match state.plane.validate_session(token, None).await {
      Ok(context) => Some(context),
      Err(e) if crate::auth::client::is_transport_failure(&e) => None,
      Err(e) => return Err(e.into()),
    },
    None => {
      let cookie_header = header_str(&headers, "cookie").unwrap_or("");
      state
        .plane
        .validate_session_with_cookie_optional(cookie_header)
        .await?
    }
  };
  req.extensions_mut().insert(OptionalUserContext(context));
  Ok(next.run(req).await)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserContext, AppError> {
  let tenant = header_str(headers, TENANT_HEADER);
  if let Some(token) = header_str(headers, SESSION_TOKEN_HEADER) {
    return state.plane.validate_session(token, tenant).await;
  }
  match header_str(headers, "cookie") {
    Some(cookie_header) => state.plane.validate_session_with_cookie(cookie_header).await,
    None => Err(AppError::unauthorized("no session credentials presented")),
  }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}
