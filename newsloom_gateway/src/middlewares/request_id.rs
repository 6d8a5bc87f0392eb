use std::time::Instant;

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use newsloom_core::observability::metrics::RequestMetrics;
use newsloom_core::observability::trace::TraceContext;
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// HTTP header for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps a request id, opens the request span that carries
/// `trace_id`/`span_id` into every log record below it, and records the
/// request-plane metrics on the way out.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
  let req_id = match req.headers().get(REQUEST_ID_HEADER) {
    Some(existing) => existing.to_str().unwrap_or_default().to_string(),
    None => {
      let req_id = Uuid::new_v4().to_string();
      if let Ok(header_value) = HeaderValue::from_str(&req_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, header_value);
      }
      req_id
    }
  };

  let trace = TraceContext::root();
  let method = req.method().as_str().to_string();
  let span = info_span!(
    "request",
    trace_id = %trace.trace_id,
    span_id = %trace.span_id,
    request_id = %req_id,
    method = %method,
    path = %req.uri().path(),
  );

  let started = Instant::now();
  let mut response = next.run(req).instrument(span).await;
  RequestMetrics::completed(&method, response.status().as_u16(), started.elapsed());

  if let Ok(header_value) = HeaderValue::from_str(&req_id) {
    response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
  }
  response
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::from_fn,
    routing::get,
    Router,
  };
  use tower::ServiceExt;

  fn app() -> Router {
    Router::new()
      .route("/", get(|| async { StatusCode::OK }))
      .layer(from_fn(request_id_middleware))
  }

  #[tokio::test]
  async fn existing_request_id_is_preserved() {
    let request = Request::builder()
      .uri("/")
      .header(REQUEST_ID_HEADER, "req-123")
      .body(Body::empty())
      .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(
      response.headers().get(REQUEST_ID_HEADER).unwrap(),
      "req-123"
    );
  }

  #[tokio::test]
  async fn missing_request_id_is_generated() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app().oneshot(request).await.unwrap();
    let id = response
      .headers()
      .get(REQUEST_ID_HEADER)
      .unwrap()
      .to_str()
      .unwrap();
    assert!(Uuid::parse_str(id).is_ok());
  }
}
