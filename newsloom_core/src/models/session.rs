use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A gateway-side view of a session. Sessions are owned by the identity
/// provider; this struct only ever holds what the auth service reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub id: String,
  pub user_id: String,
  pub active: bool,
  pub expires_at: DateTime<Utc>,
  #[serde(default)]
  pub identity_traits: serde_json::Value,
}

impl Session {
  pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
    self.active && now < self.expires_at
  }
}

/// A CSRF token bound 1:1 to a session. Validation requires both the token
/// and the session id to match; the binding lives in the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenRecord {
  pub token: String,
  pub session_id: String,
  pub expires_at: DateTime<Utc>,
}

impl CsrfTokenRecord {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}
