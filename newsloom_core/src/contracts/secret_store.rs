use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::token::TokenEnvelope;

/// One opaque record per credential name, under the fixed field names the
/// platform's Kubernetes Secrets carry. `token_data` is authoritative; the
/// flat fields are denormalized for operator inspection with kubectl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
  pub token_data: String,
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: String,
  pub rotation_metadata: String,
}

impl SecretRecord {
  pub fn from_envelope(envelope: &TokenEnvelope) -> Result<Self, AppError> {
    Ok(Self {
      token_data: envelope.to_json()?,
      access_token: envelope.token.access_token.clone(),
      refresh_token: envelope.token.refresh_token.clone(),
      expires_at: envelope.token.expires_at.to_rfc3339(),
      rotation_metadata: match &envelope.rotation_metadata {
        Some(meta) => serde_json::to_string(meta)?,
        None => String::new(),
      },
    })
  }

  pub fn to_envelope(&self) -> Result<TokenEnvelope, AppError> {
    TokenEnvelope::from_json(&self.token_data)
  }
}

#[derive(Debug, Clone)]
pub struct VersionedRecord {
  pub record: SecretRecord,
  pub version: u64,
}

/// Shared mutable state for credentials. Writes are optimistic: `put`
/// succeeds only when `expected_version` matches the stored version, and a
/// mismatch surfaces as `Conflict` for the caller to re-read and retry.
/// Reads take no locks in any real backend.
#[async_trait]
pub trait SecretStore: Send + Sync {
  async fn get(&self, name: &str) -> Result<Option<VersionedRecord>, AppError>;

  /// Returns the new stored version. `expected_version == 0` means the
  /// record must not exist yet.
  async fn put(
    &self,
    name: &str,
    record: SecretRecord,
    expected_version: u64,
  ) -> Result<u64, AppError>;
}

/// In-process backend for tests and single-node deployments.
#[derive(Default)]
pub struct MemorySecretStore {
  records: Mutex<HashMap<String, (SecretRecord, u64)>>,
}

impl MemorySecretStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
  async fn get(&self, name: &str) -> Result<Option<VersionedRecord>, AppError> {
    let records = self.records.lock().expect("secret store mutex poisoned");
    Ok(records.get(name).map(|(record, version)| VersionedRecord {
      record: record.clone(),
      version: *version,
    }))
  }

  async fn put(
    &self,
    name: &str,
    record: SecretRecord,
    expected_version: u64,
  ) -> Result<u64, AppError> {
    let mut records = self.records.lock().expect("secret store mutex poisoned");
    let current = records.get(name).map(|(_, v)| *v).unwrap_or(0);
    if current != expected_version {
      return Err(
        AppError::conflict(format!(
          "secret {name} at version {current}, write expected {expected_version}"
        ))
        .with_component("secret_store"),
      );
    }
    let next = current + 1;
    records.insert(name.to_string(), (record, next));
    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::models::token::OAuth2Token;
  use chrono::{Duration, Utc};

  fn envelope() -> TokenEnvelope {
    let now = Utc::now();
    TokenEnvelope::initial(OAuth2Token {
      access_token: "at-1".into(),
      refresh_token: "rt-1".into(),
      token_type: "Bearer".into(),
      expires_at: now + Duration::hours(1),
      issued_at: now,
      scope: None,
    })
  }

  #[tokio::test]
  async fn put_rejects_stale_version() {
    let store = MemorySecretStore::new();
    let record = SecretRecord::from_envelope(&envelope()).unwrap();

    let v1 = store.put("inoreader", record.clone(), 0).await.unwrap();
    assert_eq!(v1, 1);

    let err = store.put("inoreader", record.clone(), 0).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::Conflict));

    let v2 = store.put("inoreader", record, 1).await.unwrap();
    assert_eq!(v2, 2);
  }

  #[tokio::test]
  async fn get_returns_none_for_unknown_name() {
    let store = MemorySecretStore::new();
    assert!(store.get("missing").await.unwrap().is_none());
  }

  #[test]
  fn record_round_trips_envelope() {
    let env = envelope();
    let record = SecretRecord::from_envelope(&env).unwrap();
    assert_eq!(record.to_envelope().unwrap(), env);
    assert_eq!(record.access_token, "at-1");
  }
}
