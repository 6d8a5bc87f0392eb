use std::time::Duration;

use chrono::{DateTime, Utc};
use newsloom_core::{AppError, CsrfTokenRecord, ErrorKind, Role, Session, UserContext};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::circuit::{CircuitBreaker, CircuitState};
use crate::config::AuthConfig;

const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

#[derive(Debug, Deserialize)]
struct ValidateResponse {
  valid: bool,
  #[serde(default)]
  user_id: String,
  #[serde(default)]
  email: String,
  #[serde(default)]
  role: String,
  #[serde(default)]
  context: serde_json::Value,
  /// The gateway session the verdict was computed from. The auth service
  /// owns it; this is a snapshot for the request's duration.
  #[serde(default)]
  session: Option<Session>,
}

#[derive(Debug, Serialize)]
struct CsrfGenerateRequest<'a> {
  session_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct CsrfGenerateResponse {
  token: String,
  expires_at: DateTime<Utc>,
  #[serde(default)]
  session_id: String,
}

#[derive(Debug, Serialize)]
struct CsrfValidateRequest<'a> {
  token: &'a str,
  session_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct CsrfValidateResponse {
  valid: bool,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
  #[serde(default)]
  status: String,
}

/// REST client for the auth service (the platform's Kratos bridge).
///
/// Failure classes matter to callers: an explicit 401 is a verdict and is
/// never retried against the legacy backend, while transport-class
/// failures (network, timeout, 5xx) may be, during the migration window.
/// A consecutive-failure circuit breaker turns a dead auth service into
/// immediate transport-class errors instead of stacked timeouts.
pub struct AuthServiceClient {
  http: reqwest::Client,
  base_url: String,
  breaker: CircuitBreaker,
}

impl AuthServiceClient {
  pub fn new(config: &AuthConfig) -> Result<Self, AppError> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.validate_timeout_ms))
      .build()
      .map_err(|e| AppError::wrap(ErrorKind::Config, "failed to build http client", e))?;
    Ok(Self {
      http,
      base_url: config.service_url.trim_end_matches('/').to_string(),
      breaker: CircuitBreaker::new("auth_client"),
    })
  }

  /// `GET /v1/auth/validate` with the session token header.
  pub async fn validate_session(&self, session_token: &str) -> Result<UserContext, AppError> {
    self.check_breaker()?;
    let response = self
      .guarded(
        self
          .http
          .get(format!("{}/v1/auth/validate", self.base_url))
          .header(SESSION_TOKEN_HEADER, session_token),
      )
      .await?;
    Self::user_context_from(response).await
  }

  /// `GET /v1/auth/validate` with the browser's cookie header forwarded
  /// untouched.
  pub async fn validate_session_with_cookie(
    &self,
    cookie_header: &str,
  ) -> Result<UserContext, AppError> {
    self.check_breaker()?;
    let response = self
      .guarded(
        self
          .http
          .get(format!("{}/v1/auth/validate", self.base_url))
          .header(http::header::COOKIE, cookie_header),
      )
      .await?;
    Self::user_context_from(response).await
  }

  pub async fn generate_csrf(&self, session_token: &str) -> Result<CsrfTokenRecord, AppError> {
    self.check_breaker()?;
    let response = self
      .guarded(
        self
          .http
          .post(format!("{}/api/v1/csrf/generate", self.base_url))
          .json(&CsrfGenerateRequest { session_token }),
      )
      .await?;

    match response.status() {
      status if status.is_success() => {
        let body = response
          .json::<CsrfGenerateResponse>()
          .await
          .map_err(malformed_body)?;
        Ok(CsrfTokenRecord {
          token: body.token,
          session_id: body.session_id,
          expires_at: body.expires_at,
        })
      }
      StatusCode::UNAUTHORIZED => Err(
        AppError::session_not_found("csrf generation for unknown session")
          .with_component("auth_client"),
      ),
      status => Err(upstream_error(status, "csrf generate")),
    }
  }

  /// Asks the auth service whether `token` belongs to the session. `false`
  /// covers unknown tokens and cross-session reuse alike; the distinction
  /// never leaves the auth service.
  pub async fn validate_csrf(&self, token: &str, session_token: &str) -> Result<bool, AppError> {
    self.check_breaker()?;
    let response = self
      .guarded(
        self
          .http
          .post(format!("{}/api/v1/csrf/validate", self.base_url))
          .json(&CsrfValidateRequest {
            token,
            session_token,
          }),
      )
      .await?;

    match response.status() {
      status if status.is_success() => {
        let body = response
          .json::<CsrfValidateResponse>()
          .await
          .map_err(malformed_body)?;
        Ok(body.valid)
      }
      status => Err(upstream_error(status, "csrf validate")),
    }
  }

  /// `GET /health`; a non-ok status is degraded, not fatal. Health probes
  /// skip the open-circuit check so recovery is still observed, but their
  /// outcome feeds the breaker.
  pub async fn health_ok(&self) -> Result<bool, AppError> {
    let response = self
      .guarded(self.http.get(format!("{}/health", self.base_url)))
      .await?;
    if !response.status().is_success() {
      return Ok(false);
    }
    let body = response.json::<HealthResponse>().await.map_err(malformed_body)?;
    Ok(body.status == "ok")
  }

  pub fn circuit_state(&self) -> CircuitState {
    self.breaker.state()
  }

  fn check_breaker(&self) -> Result<(), AppError> {
    if self.breaker.allow() {
      return Ok(());
    }
    Err(
      AppError::service_unavailable("auth service circuit open")
        .with_component("auth_client")
        .with_context("circuit", "open"),
    )
  }

  /// Send the request, feeding the breaker: any HTTP verdict closes it,
  /// transport failures count toward opening it.
  async fn guarded(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AppError> {
    match request.send().await {
      Ok(response) => {
        self.breaker.record_success();
        Ok(response)
      }
      Err(e) => {
        self.breaker.record_failure();
        Err(transport_error(e))
      }
    }
  }

  async fn user_context_from(response: reqwest::Response) -> Result<UserContext, AppError> {
    match response.status() {
      status if status.is_success() => {
        let body = response
          .json::<ValidateResponse>()
          .await
          .map_err(malformed_body)?;
        if !body.valid {
          return Err(AppError::unauthorized("auth service reported invalid session"));
        }
        // The verdict must agree with the session snapshot it came from;
        // an inactive or already-expired session is not accepted even
        // under a `valid: true` verdict.
        if let Some(session) = &body.session {
          if !session.is_usable_at(Utc::now()) {
            return Err(
              AppError::session_not_found("session snapshot inactive or expired")
                .with_component("auth_client")
                .with_context("session_id", session.id.clone()),
            );
          }
        }
        let role = body
          .role
          .parse::<Role>()
          .map_err(|_| AppError::unauthorized(format!("unmapped role {:?}", body.role)))?;
        Ok(UserContext {
          user_id: body.user_id,
          email: body.email,
          role,
          tenant_id: body
            .context
            .get("tenant_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
          expires_at: body.session.as_ref().map(|s| s.expires_at).or_else(|| {
            body
              .context
              .get("expires_at")
              .and_then(serde_json::Value::as_str)
              .and_then(|s| s.parse::<DateTime<Utc>>().ok())
          }),
        })
      }
      StatusCode::UNAUTHORIZED => {
        Err(AppError::unauthorized("session rejected by auth service"))
      }
      status => Err(upstream_error(status, "session validate")),
    }
  }
}

/// True when the failure says nothing about the session itself, only about
/// reaching the auth service. Hybrid fallback keys off this.
pub fn is_transport_failure(err: &AppError) -> bool {
  matches!(
    err.kind,
    ErrorKind::Timeout | ErrorKind::ServiceUnavailable | ErrorKind::Kratos | ErrorKind::ExternalApi
  )
}

fn transport_error(e: reqwest::Error) -> AppError {
  let kind = if e.is_timeout() {
    ErrorKind::Timeout
  } else {
    ErrorKind::ServiceUnavailable
  };
  AppError::wrap(kind, format!("auth service unreachable: {e}"), e)
    .with_component("auth_client")
}

fn malformed_body(e: reqwest::Error) -> AppError {
  AppError::wrap(ErrorKind::ExternalApi, "malformed auth service response", e)
    .with_component("auth_client")
}

fn upstream_error(status: StatusCode, operation: &str) -> AppError {
  if status.is_server_error() {
    AppError::kratos(format!("auth service returned {status} for {operation}"))
      .with_component("auth_client")
  } else {
    AppError::external_api(format!(
      "auth service returned unexpected {status} for {operation}"
    ))
    .with_component("auth_client")
  }
}
