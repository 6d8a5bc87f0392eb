use std::sync::Arc;

use newsloom_core::observability::metrics::AuthPlaneMetrics;
use newsloom_core::{AppError, CsrfTokenRecord, UserContext};
use tracing::{debug, warn};

use super::client::{is_transport_failure, AuthServiceClient};
use super::legacy::{LegacyAuthBackend, LegacyCsrfCheck, LEGACY_CSRF_PREFIX};
use super::migration::{MigrationController, MigrationMode};

/// Cookie set by the identity gateway for browser sessions.
pub const GATEWAY_SESSION_COOKIE: &str = "ory_kratos_session";
/// Cookie carrying pre-gateway session tokens.
pub const LEGACY_SESSION_COOKIE: &str = "newsloom_session";

/// The session and CSRF authentication plane.
///
/// Establishes a `UserContext` at request entry, verifies CSRF binding for
/// mutating verbs, and routes between the auth service and the in-process
/// legacy backend according to the migration phase.
pub struct SessionPlane {
  client: AuthServiceClient,
  legacy: Option<LegacyAuthBackend>,
  migration: Arc<MigrationController>,
}

impl SessionPlane {
  pub fn new(
    client: AuthServiceClient,
    legacy: Option<LegacyAuthBackend>,
    migration: Arc<MigrationController>,
  ) -> Self {
    Self {
      client,
      legacy,
      migration,
    }
  }

  pub fn migration(&self) -> &Arc<MigrationController> {
    &self.migration
  }

  /// Validate a bare session token (header transport), optionally scoped
  /// to a tenant.
  pub async fn validate_session(
    &self,
    session_token: &str,
    tenant_id: Option<&str>,
  ) -> Result<UserContext, AppError> {
    if session_token.is_empty() {
      return Err(AppError::unauthorized("no session token presented"));
    }

    let context = match self.migration.mode() {
      MigrationMode::LegacyOnly => self.validate_legacy_token(session_token)?,
      MigrationMode::GatewayOnly => {
        let result = self.client.validate_session(session_token).await;
        self.record_gateway_outcome(&result);
        result?
      }
      MigrationMode::Hybrid => match self.client.validate_session(session_token).await {
        Ok(context) => {
          AuthPlaneMetrics::session_validation("gateway", "valid");
          context
        }
        Err(e) if is_transport_failure(&e) && self.legacy.is_some() => {
          AuthPlaneMetrics::session_validation("gateway", "transport_failure");
          debug!(error_id = %e.error_id, "auth service unreachable, trying legacy backend");
          self.validate_legacy_token(session_token)?
        }
        Err(e) => {
          self.record_gateway_outcome::<UserContext>(&Err(e.clone()));
          return Err(e);
        }
      },
    };

    if let Some(tenant) = tenant_id {
      if context.tenant_id.as_deref() != Some(tenant) {
        return Err(
          AppError::forbidden(format!("session is not scoped to tenant {tenant}"))
            .with_component("session_plane"),
        );
      }
    }
    Ok(context)
  }

  /// Validate from a raw `Cookie` header. A gateway session cookie routes
  /// to the auth service with the header forwarded untouched; otherwise
  /// the legacy cookie is checked while the migration still allows it.
  pub async fn validate_session_with_cookie(
    &self,
    cookie_header: &str,
  ) -> Result<UserContext, AppError> {
    let has_gateway_cookie = cookie_value(cookie_header, GATEWAY_SESSION_COOKIE).is_some();
    let mode = self.migration.mode();

    if has_gateway_cookie && mode != MigrationMode::LegacyOnly {
      match self.client.validate_session_with_cookie(cookie_header).await {
        Ok(context) => {
          AuthPlaneMetrics::session_validation("gateway", "valid");
          return Ok(context);
        }
        Err(e) if is_transport_failure(&e) && mode == MigrationMode::Hybrid => {
          AuthPlaneMetrics::session_validation("gateway", "transport_failure");
          if let (Some(_), Some(legacy_token)) = (
            self.legacy.as_ref(),
            cookie_value(cookie_header, LEGACY_SESSION_COOKIE),
          ) {
            debug!(error_id = %e.error_id, "auth service unreachable, trying legacy cookie");
            return self.validate_legacy_token(&legacy_token);
          }
          return Err(e);
        }
        Err(e) => {
          self.record_gateway_outcome::<UserContext>(&Err(e.clone()));
          return Err(e);
        }
      }
    }

    match mode {
      // After completion the absence of a gateway session is final, no
      // matter what else the request carries.
      MigrationMode::GatewayOnly => {
        AuthPlaneMetrics::session_validation("gateway", "missing");
        Err(AppError::unauthorized("no gateway session cookie"))
      }
      MigrationMode::LegacyOnly | MigrationMode::Hybrid => {
        match cookie_value(cookie_header, LEGACY_SESSION_COOKIE) {
          Some(token) => self.validate_legacy_token(&token),
          None => {
            AuthPlaneMetrics::session_validation("legacy", "missing");
            Err(AppError::unauthorized("no session cookie"))
          }
        }
      }
    }
  }

  /// Optional-auth variant: absent credentials and transport failures
  /// yield `None` and the handler decides; explicitly rejected
  /// credentials still fail.
  pub async fn validate_session_with_cookie_optional(
    &self,
    cookie_header: &str,
  ) -> Result<Option<UserContext>, AppError> {
    let presented = cookie_value(cookie_header, GATEWAY_SESSION_COOKIE).is_some()
      || cookie_value(cookie_header, LEGACY_SESSION_COOKIE).is_some();
    if !presented {
      return Ok(None);
    }
    match self.validate_session_with_cookie(cookie_header).await {
      Ok(context) => Ok(Some(context)),
      Err(e) if is_transport_failure(&e) => {
        warn!(error_id = %e.error_id, "optional-auth endpoint degrading to anonymous");
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  pub async fn generate_csrf_token(
    &self,
    session_token: &str,
  ) -> Result<CsrfTokenRecord, AppError> {
    match self.migration.mode() {
      MigrationMode::LegacyOnly => {
        let legacy = self.legacy_backend()?;
        let session_id = legacy.session_id_of(session_token)?;
        legacy.generate_csrf(&session_id)
      }
      MigrationMode::Hybrid | MigrationMode::GatewayOnly => {
        self.client.generate_csrf(session_token).await
      }
    }
  }

  /// Verify a CSRF token against its session. A missing token never
  /// reaches the network: the caller is rejected before any backend is
  /// consulted. Invalid and cross-session tokens are rejected with the
  /// same public shape; the attack class goes only to logs and metrics.
  pub async fn validate_csrf_token(
    &self,
    token: &str,
    session_token: &str,
  ) -> Result<(), AppError> {
    if token.is_empty() {
      AuthPlaneMetrics::csrf_validation("missing_token");
      return Err(
        AppError::csrf_invalid("csrf token missing on mutating request")
          .with_component("session_plane")
          .with_context("attack_class", "missing_token"),
      );
    }

    let mode = self.migration.mode();
    if token.starts_with(LEGACY_CSRF_PREFIX) {
      return self.validate_legacy_csrf(token, session_token, mode);
    }
    if mode == MigrationMode::LegacyOnly {
      // Gateway-format tokens have no issuer yet; reject locally.
      warn!(attack_class = "invalid_token", "csrf validation rejected");
      return Err(self.csrf_rejection("invalid_token"));
    }

    match self.client.validate_csrf(token, session_token).await {
      Ok(true) => {
        AuthPlaneMetrics::csrf_validation("valid");
        Ok(())
      }
      Ok(false) => {
        AuthPlaneMetrics::csrf_validation("invalid_token");
        warn!(attack_class = "invalid_token", "csrf validation rejected");
        Err(
          AppError::csrf_invalid("csrf token rejected by auth service")
            .with_component("session_plane")
            .with_context("attack_class", "invalid_token"),
        )
      }
      Err(e) => Err(e),
    }
  }

  fn validate_legacy_csrf(
    &self,
    token: &str,
    session_token: &str,
    mode: MigrationMode,
  ) -> Result<(), AppError> {
    // Legacy tokens die with the cut-over.
    if mode == MigrationMode::GatewayOnly {
      AuthPlaneMetrics::csrf_validation("invalid_token");
      return Err(
        AppError::csrf_invalid("legacy csrf token after migration completion")
          .with_component("session_plane")
          .with_context("attack_class", "invalid_token"),
      );
    }

    let legacy = self.legacy_backend()?;
    let session_id = legacy
      .session_id_of(session_token)
      .map_err(|_| self.csrf_rejection("invalid_token"))?;

    match legacy.check_csrf(token, &session_id) {
      LegacyCsrfCheck::Valid => {
        AuthPlaneMetrics::csrf_validation("valid");
        Ok(())
      }
      LegacyCsrfCheck::WrongSession => {
        warn!(attack_class = "cross_session", "csrf validation rejected");
        Err(self.csrf_rejection("cross_session"))
      }
      LegacyCsrfCheck::Malformed | LegacyCsrfCheck::Expired => {
        warn!(attack_class = "invalid_token", "csrf validation rejected");
        Err(self.csrf_rejection("invalid_token"))
      }
    }
  }

  fn csrf_rejection(&self, attack_class: &'static str) -> AppError {
    AuthPlaneMetrics::csrf_validation(attack_class);
    AppError::csrf_invalid("csrf token rejected")
      .with_component("session_plane")
      .with_context("attack_class", attack_class)
  }

  /// Health of the auth service dependency, for the gateway's own health
  /// endpoint. Unreachable or non-ok is degraded, never fatal.
  pub async fn auth_service_healthy(&self) -> Result<bool, AppError> {
    self.client.health_ok().await
  }

  pub fn auth_circuit_state(&self) -> super::circuit::CircuitState {
    self.client.circuit_state()
  }

  fn validate_legacy_token(&self, token: &str) -> Result<UserContext, AppError> {
    let legacy = self.legacy_backend()?;
    match legacy.validate_session_token(token) {
      Ok(context) => {
        AuthPlaneMetrics::session_validation("legacy", "valid");
        Ok(context)
      }
      Err(e) => {
        AuthPlaneMetrics::session_validation("legacy", "invalid");
        Err(e)
      }
    }
  }

  fn legacy_backend(&self) -> Result<&LegacyAuthBackend, AppError> {
    self.legacy.as_ref().ok_or_else(|| {
      AppError::config("legacy backend required but not configured")
        .with_component("session_plane")
    })
  }

  fn record_gateway_outcome<T>(&self, result: &Result<T, AppError>) {
    match result {
      Ok(_) => AuthPlaneMetrics::session_validation("gateway", "valid"),
      Err(e) if is_transport_failure(e) => {
        AuthPlaneMetrics::session_validation("gateway", "transport_failure")
      }
      Err(_) => AuthPlaneMetrics::session_validation("gateway", "invalid"),
    }
  }
}

/// Extract one cookie's value from a raw `Cookie` header.
pub fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
  cookie_header
    .split(';')
    .map(str::trim)
    .find_map(|cookie| {
      let mut parts = cookie.splitn(2, '=');
      match (parts.next(), parts.next()) {
        (Some(n), Some(v)) if n == name => Some(v.to_string()),
        _ => None,
      }
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cookie_value_parses_multi_cookie_headers() {
    let header = "ory_kratos_session=abc123; newsloom_session=def456; theme=dark";
    assert_eq!(
      cookie_value(header, GATEWAY_SESSION_COOKIE).as_deref(),
      Some("abc123")
    );
    assert_eq!(
      cookie_value(header, LEGACY_SESSION_COOKIE).as_deref(),
      Some("def456")
    );
    assert_eq!(cookie_value(header, "missing"), None);
  }

  #[test]
  fn cookie_value_keeps_equals_inside_value() {
    let header = "newsloom_session=abc=def==";
    assert_eq!(
      cookie_value(header, LEGACY_SESSION_COOKIE).as_deref(),
      Some("abc=def==")
    );
  }
}
