use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use newsloom_core::contracts::{SecretRecord, SecretStore};
use newsloom_core::observability::metrics::RefreshMetrics;
use newsloom_core::{AppError, ErrorKind, OAuth2Token, TokenEnvelope};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::single_flight::SingleFlight;
use super::state::CredentialState;
use crate::config::{CredentialConfig, OAuthConfig};
use crate::oauth::RefreshProvider;

const EVENT_ROTATION: &str = "refresh_succeeded_rotation";
const EVENT_NO_ROTATION: &str = "refresh_succeeded_no_rotation";
const EVENT_FAILED: &str = "refresh_failed";

/// Per-consumer refresh behavior knobs.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
  pub clock_skew: Duration,
  /// How long a handed-out token must stay usable for the caller. A worker
  /// running hour-long ingestion jobs configures a larger buffer here.
  pub refresh_buffer: Duration,
  pub max_put_retries: u32,
  /// Recorded in rotation metadata as the session that performed the write.
  pub refreshed_by: String,
}

impl RefreshPolicy {
  pub fn from_config(oauth: &OAuthConfig, credential: &CredentialConfig) -> Self {
    Self {
      clock_skew: Duration::seconds(oauth.clock_skew_seconds),
      refresh_buffer: Duration::seconds(credential.refresh_buffer_seconds),
      max_put_retries: credential.max_put_retries,
      refreshed_by: format!("credential-sidecar/{}", credential.name),
    }
  }
}

/// Point-in-time view of a credential, served on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
  pub name: String,
  pub state: CredentialState,
  pub valid: bool,
  pub expires_at: Option<DateTime<Utc>>,
  pub last_rotation_at: Option<DateTime<Utc>>,
  pub rotations_total: u64,
}

/// Owns one named OAuth2 credential: hands out non-expired access tokens,
/// refreshes ahead of expiry, and persists rotations with optimistic
/// concurrency. At most one refresh per credential is ever in flight.
pub struct TokenLifecycleManager {
  name: String,
  provider: Arc<dyn RefreshProvider>,
  store: Arc<dyn SecretStore>,
  policy: RefreshPolicy,
  flight: SingleFlight<Result<OAuth2Token, AppError>>,
  state: Mutex<CredentialState>,
  rotations_total: AtomicU64,
  last_rotation_at: Mutex<Option<DateTime<Utc>>>,
}

impl TokenLifecycleManager {
  pub fn new(
    name: impl Into<String>,
    provider: Arc<dyn RefreshProvider>,
    store: Arc<dyn SecretStore>,
    policy: RefreshPolicy,
  ) -> Self {
    Self {
      name: name.into(),
      provider,
      store,
      policy,
      flight: SingleFlight::new(),
      state: Mutex::new(CredentialState::Uninitialized),
      rotations_total: AtomicU64::new(0),
      last_rotation_at: Mutex::new(None),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Return a token that will not need a refresh for at least the
  /// configured buffer, refreshing it first if necessary.
  #[instrument(skip(self), fields(credential = %self.name))]
  pub async fn ensure_valid_token(&self) -> Result<OAuth2Token, AppError> {
    if self.state().is_terminal() {
      return Err(self.permanent_failure_error());
    }

    let envelope = self.load_envelope().await?;
    if !self.needs_refresh(&envelope.token) {
      self.set_state(CredentialState::Loaded);
      RefreshMetrics::set_token_valid(&self.name, true);
      return Ok(envelope.token);
    }

    self
      .flight
      .run(&self.name, || self.refresh_under_flight(false))
      .await
  }

  /// Refresh regardless of remaining lifetime. Still single-flight, and
  /// also the operator's way out of `FailedPermanent`.
  #[instrument(skip(self), fields(credential = %self.name))]
  pub async fn force_refresh(&self) -> Result<OAuth2Token, AppError> {
    self
      .flight
      .run(&self.name, || self.refresh_under_flight(true))
      .await
  }

  pub async fn current_status(&self) -> CredentialStatus {
    let envelope = self.load_envelope().await.ok();
    let (valid, expires_at) = match &envelope {
      Some(env) => (
        !env.token.is_expired(self.policy.clock_skew),
        Some(env.token.expires_at),
      ),
      None => (false, None),
    };
    CredentialStatus {
      name: self.name.clone(),
      state: self.state(),
      valid,
      expires_at,
      last_rotation_at: *self.last_rotation_at.lock().expect("rotation mutex poisoned"),
      rotations_total: self.rotations_total.load(Ordering::Relaxed),
    }
  }

  /// Interval for the proactive refresh task: half the remaining lifetime,
  /// capped at 30 minutes.
  pub async fn proactive_refresh_interval(&self) -> std::time::Duration {
    let fallback = std::time::Duration::from_secs(60);
    match self.load_envelope().await {
      Ok(envelope) => {
        let remaining = (envelope.token.expires_at - Utc::now()).num_seconds().max(0);
        std::time::Duration::from_secs((remaining as u64 / 2).clamp(30, 30 * 60))
      }
      Err(_) => fallback,
    }
  }

  fn state(&self) -> CredentialState {
    *self.state.lock().expect("state mutex poisoned")
  }

  fn set_state(&self, next: CredentialState) {
    *self.state.lock().expect("state mutex poisoned") = next;
  }

  fn needs_refresh(&self, token: &OAuth2Token) -> bool {
    token.needs_refresh(self.policy.clock_skew, self.policy.refresh_buffer)
  }

  fn permanent_failure_error(&self) -> AppError {
    AppError::invalid_credentials(format!(
      "credential {} requires operator reseeding",
      self.name
    ))
    .with_component("token_lifecycle")
    .with_operation("ensure_valid_token")
  }

  async fn load_envelope(&self) -> Result<TokenEnvelope, AppError> {
    let versioned = self.store.get(&self.name).await?;
    match versioned {
      Some(v) => {
        let envelope = v.record.to_envelope()?;
        if envelope.version != v.version {
          // The store's version column is authoritative.
          let mut env = envelope;
          env.version = v.version;
          return Ok(env);
        }
        Ok(envelope)
      }
      None => Err(
        AppError::config(format!("no seed credential stored under {}", self.name))
          .with_component("token_lifecycle"),
      ),
    }
  }

  async fn refresh_under_flight(&self, force: bool) -> Result<OAuth2Token, AppError> {
    self.set_state(CredentialState::Refreshing);
    let result = self.refresh_inner(force).await;
    match &result {
      Ok(_) => {
        self.set_state(CredentialState::Loaded);
        RefreshMetrics::set_token_valid(&self.name, true);
      }
      Err(e) if e.kind == ErrorKind::InvalidCredentials => {
        self.set_state(CredentialState::FailedPermanent);
        RefreshMetrics::set_token_valid(&self.name, false);
      }
      Err(_) => {
        self.set_state(CredentialState::FailedTransient);
        RefreshMetrics::set_token_valid(&self.name, false);
      }
    }
    result
  }

  async fn refresh_inner(&self, force: bool) -> Result<OAuth2Token, AppError> {
    let started = Instant::now();

    let mut attempt = 0u32;
    loop {
      // Re-read on every attempt: another process may have refreshed while
      // we waited for the slot or lost a version race.
      let envelope = self.load_envelope().await?;
      let skip_freshness_check = force && attempt == 0;
      if !skip_freshness_check && !self.needs_refresh(&envelope.token) {
        return Ok(envelope.token);
      }

      let response = match self.provider.refresh(&envelope.token.refresh_token).await {
        Ok(response) => response,
        Err(e) => {
          warn!(credential = %self.name, error = %e, "token refresh failed");
          RefreshMetrics::refresh_completed(&self.name, EVENT_FAILED, started.elapsed());
          return Err(e);
        }
      };

      let merged = envelope.token.update_from_refresh(&response);
      if merged.is_expired(self.policy.clock_skew) {
        RefreshMetrics::refresh_completed(&self.name, EVENT_FAILED, started.elapsed());
        return Err(
          AppError::internal(format!(
            "provider returned an already-expired token for {} (expires_at {})",
            self.name, merged.expires_at
          ))
          .with_component("token_lifecycle")
          .with_operation("refresh"),
        );
      }

      let next = envelope.next(merged, &self.policy.refreshed_by);
      let record = SecretRecord::from_envelope(&next)?;
      match self.store.put(&self.name, record, envelope.version).await {
        Ok(version) => {
          let rotated = next
            .rotation_metadata
            .as_ref()
            .map(|m| m.refresh_token_changed)
            .unwrap_or(false);
          if rotated {
            self.rotations_total.fetch_add(1, Ordering::Relaxed);
            *self
              .last_rotation_at
              .lock()
              .expect("rotation mutex poisoned") = Some(Utc::now());
          }
          let event = if rotated { EVENT_ROTATION } else { EVENT_NO_ROTATION };
          RefreshMetrics::refresh_completed(&self.name, event, started.elapsed());
          info!(
            credential = %self.name,
            version,
            rotated,
            "token refresh committed"
          );
          return Ok(next.token);
        }
        Err(e) if e.is_kind(ErrorKind::Conflict) && attempt < self.policy.max_put_retries => {
          attempt += 1;
          continue;
        }
        Err(e) if e.is_kind(ErrorKind::Conflict) => {
          RefreshMetrics::refresh_completed(&self.name, EVENT_FAILED, started.elapsed());
          return Err(
            AppError::wrap(
              ErrorKind::Conflict,
              format!(
                "could not commit refresh of {} after {} version conflicts",
                self.name, self.policy.max_put_retries
              ),
              e,
            )
            .with_component("token_lifecycle"),
          );
        }
        Err(e) => {
          RefreshMetrics::refresh_completed(&self.name, EVENT_FAILED, started.elapsed());
          return Err(e);
        }
      }
    }
  }
}
