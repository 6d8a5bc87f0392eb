use std::time::Duration;

use metrics::{counter, gauge, histogram};

// Metric names are fixed here so every service emits the same series.
// Labels per metric are fixed by the collector helpers below; nothing
// user-controlled may become a label value.
pub const REQUESTS_TOTAL: &str = "newsloom_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "newsloom_request_duration_seconds";
pub const REFRESH_TOTAL: &str = "newsloom_refresh_total";
pub const REFRESH_DURATION_SECONDS: &str = "newsloom_refresh_duration_seconds";
pub const CSRF_VALIDATIONS_TOTAL: &str = "newsloom_csrf_validations_total";
pub const SESSION_VALIDATIONS_TOTAL: &str = "newsloom_session_validations_total";
pub const CIRCUIT_STATE_TRANSITIONS_TOTAL: &str =
  "newsloom_circuit_breaker_state_transitions_total";
pub const TOKENS_VALID: &str = "newsloom_tokens_valid";
pub const STACKS_RUNNING: &str = "newsloom_stacks_running";

/// Pre-register every series at zero so dashboards see them before the
/// first event.
pub fn register_core_metrics() {
  counter!(REQUESTS_TOTAL, "method" => "GET", "status" => "200").absolute(0);
  counter!(REFRESH_TOTAL, "credential" => "", "outcome" => "refresh_succeeded_no_rotation")
    .absolute(0);
  counter!(CSRF_VALIDATIONS_TOTAL, "outcome" => "valid").absolute(0);
  counter!(SESSION_VALIDATIONS_TOTAL, "backend" => "gateway", "outcome" => "valid").absolute(0);
  counter!(CIRCUIT_STATE_TRANSITIONS_TOTAL, "component" => "auth_client", "to" => "open")
    .absolute(0);
  histogram!(REQUEST_DURATION_SECONDS, "method" => "GET").record(0.0);
  histogram!(REFRESH_DURATION_SECONDS, "credential" => "").record(0.0);
  gauge!(TOKENS_VALID, "credential" => "").set(0.0);
  gauge!(STACKS_RUNNING).set(0.0);
}

/// Request-plane metrics.
pub struct RequestMetrics;

impl RequestMetrics {
  pub fn completed(method: &str, status: u16, duration: Duration) {
    counter!(
      REQUESTS_TOTAL,
      "method" => method.to_string(),
      "status" => status.to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string())
      .record(duration.as_secs_f64());
  }
}

/// Token-lifecycle metrics; `outcome` is one of the three refresh events.
pub struct RefreshMetrics;

impl RefreshMetrics {
  pub fn refresh_completed(credential: &str, outcome: &str, duration: Duration) {
    counter!(
      REFRESH_TOTAL,
      "credential" => credential.to_string(),
      "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(REFRESH_DURATION_SECONDS, "credential" => credential.to_string())
      .record(duration.as_secs_f64());
  }

  pub fn set_token_valid(credential: &str, valid: bool) {
    gauge!(TOKENS_VALID, "credential" => credential.to_string())
      .set(if valid { 1.0 } else { 0.0 });
  }
}

/// Session/CSRF plane metrics.
pub struct AuthPlaneMetrics;

impl AuthPlaneMetrics {
  pub fn csrf_validation(outcome: &str) {
    counter!(CSRF_VALIDATIONS_TOTAL, "outcome" => outcome.to_string()).increment(1);
  }

  pub fn session_validation(backend: &str, outcome: &str) {
    counter!(
      SESSION_VALIDATIONS_TOTAL,
      "backend" => backend.to_string(),
      "outcome" => outcome.to_string()
    )
    .increment(1);
  }

  pub fn circuit_transition(component: &str, to: &str) {
    counter!(
      CIRCUIT_STATE_TRANSITIONS_TOTAL,
      "component" => component.to_string(),
      "to" => to.to_string()
    )
    .increment(1);
  }
}

/// Orchestration metrics, fed by operators applying plans.
pub struct StackMetrics;

impl StackMetrics {
  pub fn set_stacks_running(count: usize) {
    gauge!(STACKS_RUNNING).set(count as f64);
  }
}
