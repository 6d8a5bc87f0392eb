use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;

/// Response headers from the enumerated security options.
pub async fn security_headers_middleware(
  State(state): State<AppState>,
  req: Request,
  next: Next,
) -> Response {
  let mut response = next.run(req).await;
  if state.security.hsts {
    response.headers_mut().insert(
      "strict-transport-security",
      HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
  }
  if let Some(csp) = &state.security.content_security_policy {
    if let Ok(value) = HeaderValue::from_str(csp) {
      response
        .headers_mut()
        .insert("content-security-policy", value);
    }
  }
  response
}
