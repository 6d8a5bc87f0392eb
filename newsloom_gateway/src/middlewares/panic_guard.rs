use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::error;

use crate::error::panic_response;

/// Root-level panic containment: no panic escapes the request boundary.
/// The payload is logged and the client receives a fresh `INTERNAL`
/// error id.
pub async fn panic_guard_middleware(req: Request, next: Next) -> Response {
  match AssertUnwindSafe(next.run(req)).catch_unwind().await {
    Ok(response) => response,
    Err(payload) => {
      let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
      error!(panic = %detail, "handler panicked");
      panic_response()
    }
  }
}
