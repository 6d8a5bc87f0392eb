use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Default tolerance for clocks disagreeing between this process and the
/// OAuth provider. Overridable via `OAUTH2_CLOCK_SKEW_SECONDS`.
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 60;

/// A third-party OAuth2 credential as held in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
  pub access_token: String,
  pub refresh_token: String,
  pub token_type: String,
  pub expires_at: DateTime<Utc>,
  pub issued_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scope: Option<String>,
}

impl OAuth2Token {
  /// A token is usable only when it carries an access token at all.
  pub fn is_valid(&self) -> bool {
    !self.access_token.is_empty()
  }

  pub fn is_expired(&self, clock_skew: Duration) -> bool {
    self.is_expired_at(Utc::now(), clock_skew)
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>, clock_skew: Duration) -> bool {
    now + clock_skew >= self.expires_at
  }

  /// Whether the token should be refreshed before handing it to a caller
  /// that needs it to stay valid for at least `buffer`.
  pub fn needs_refresh(&self, clock_skew: Duration, buffer: Duration) -> bool {
    self.needs_refresh_at(Utc::now(), clock_skew, buffer)
  }

  pub fn needs_refresh_at(
    &self,
    now: DateTime<Utc>,
    clock_skew: Duration,
    buffer: Duration,
  ) -> bool {
    now + clock_skew + buffer >= self.expires_at
  }

  /// Merge a provider refresh response into a successor token.
  ///
  /// Providers may omit `refresh_token`; the stored one is retained in that
  /// case (rotation is optional in the OAuth2 refresh grant).
  pub fn update_from_refresh(&self, response: &TokenRefreshResponse) -> OAuth2Token {
    let issued_at = Utc::now();
    let refresh_token = match response.refresh_token.as_deref() {
      Some(rt) if !rt.is_empty() => rt.to_string(),
      _ => self.refresh_token.clone(),
    };
    OAuth2Token {
      access_token: response.access_token.clone(),
      refresh_token,
      token_type: response
        .token_type
        .clone()
        .unwrap_or_else(|| self.token_type.clone()),
      expires_at: issued_at + Duration::seconds(response.expires_in),
      issued_at,
      scope: response.scope.clone().or_else(|| self.scope.clone()),
    }
  }

  /// First 16 hex chars of the SHA-256 of the access token. Stored in
  /// rotation metadata so operators can correlate rotations without the
  /// secret value ever appearing in logs.
  pub fn access_token_fingerprint(&self) -> String {
    let digest = Sha256::digest(self.access_token.as_bytes());
    hex::encode(digest)[..16].to_string()
  }
}

/// Standard OAuth2 refresh-grant response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshResponse {
  pub access_token: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token_type: Option<String>,
  pub expires_in: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub refresh_token: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scope: Option<String>,
}

/// What happened in the refresh that produced the current envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationMetadata {
  pub previous_access_token_fingerprint: String,
  pub refresh_token_changed: bool,
  pub refreshed_by: String,
}

/// Persisted wrapper around a token: a monotonically advancing version plus
/// rotation bookkeeping. Updates go through compare-and-swap on `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
  pub token: OAuth2Token,
  pub version: u64,
  pub updated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rotation_metadata: Option<RotationMetadata>,
}

impl TokenEnvelope {
  /// Bootstrap envelope for a freshly seeded credential.
  pub fn initial(token: OAuth2Token) -> Self {
    Self {
      token,
      version: 1,
      updated_at: Utc::now(),
      rotation_metadata: None,
    }
  }

  /// Successor envelope after a refresh. Detects rotation by comparing the
  /// stored and incoming refresh tokens.
  pub fn next(&self, token: OAuth2Token, refreshed_by: impl Into<String>) -> Self {
    let rotation_metadata = RotationMetadata {
      previous_access_token_fingerprint: self.token.access_token_fingerprint(),
      refresh_token_changed: token.refresh_token != self.token.refresh_token,
      refreshed_by: refreshed_by.into(),
    };
    Self {
      token,
      version: self.version + 1,
      updated_at: Utc::now(),
      rotation_metadata: Some(rotation_metadata),
    }
  }

  pub fn to_json(&self) -> Result<String, AppError> {
    serde_json::to_string(self).map_err(AppError::from)
  }

  pub fn from_json(raw: &str) -> Result<Self, AppError> {
    serde_json::from_str(raw)
      .map_err(|e| AppError::wrap(crate::error::ErrorKind::Config, "malformed token envelope", e))
  }
}
