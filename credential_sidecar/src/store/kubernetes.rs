use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use newsloom_core::contracts::{SecretRecord, SecretStore, VersionedRecord};
use newsloom_core::{AppError, ErrorKind};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::KubernetesStoreConfig;

const FIELD_TOKEN_DATA: &str = "token_data";
const FIELD_ACCESS_TOKEN: &str = "access_token";
const FIELD_REFRESH_TOKEN: &str = "refresh_token";
const FIELD_EXPIRES_AT: &str = "expires_at";
const FIELD_ROTATION_METADATA: &str = "rotation_metadata";
const FIELD_VERSION: &str = "version";

/// Secret store backed by Kubernetes `Secret` objects, one per credential.
///
/// The record's optimistic version lives in the secret's data alongside the
/// payload; the apiserver's own `resourceVersion` precondition on replace
/// closes the read-modify-write window, so a lost race always surfaces as
/// `Conflict` rather than a silent overwrite.
pub struct KubernetesSecretStore {
  http: reqwest::Client,
  api_url: String,
  namespace: String,
  auth_token: String,
}

impl KubernetesSecretStore {
  pub fn new(config: &KubernetesStoreConfig) -> Result<Self, AppError> {
    let auth_token = std::fs::read_to_string(&config.service_account_token_path)
      .map_err(|e| {
        AppError::wrap(
          ErrorKind::Config,
          format!(
            "cannot read service account token at {}",
            config.service_account_token_path
          ),
          e,
        )
      })?
      .trim()
      .to_string();

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_seconds))
      .build()
      .map_err(|e| AppError::wrap(ErrorKind::Config, "failed to build http client", e))?;

    Ok(Self {
      http,
      api_url: config.api_url.trim_end_matches('/').to_string(),
      namespace: config.namespace.clone(),
      auth_token,
    })
  }

  fn secret_url(&self, name: Option<&str>) -> String {
    match name {
      Some(name) => format!(
        "{}/api/v1/namespaces/{}/secrets/{}",
        self.api_url, self.namespace, name
      ),
      None => format!("{}/api/v1/namespaces/{}/secrets", self.api_url, self.namespace),
    }
  }

  async fn fetch_secret(&self, name: &str) -> Result<Option<Value>, AppError> {
    let response = self
      .http
      .get(self.secret_url(Some(name)))
      .bearer_auth(&self.auth_token)
      .send()
      .await
      .map_err(transport_error)?;

    match response.status() {
      StatusCode::NOT_FOUND => Ok(None),
      status if status.is_success() => {
        let body = response.json::<Value>().await.map_err(|e| {
          AppError::wrap(ErrorKind::Database, "malformed secret object from apiserver", e)
        })?;
        Ok(Some(body))
      }
      status => Err(api_error(status, "get secret")),
    }
  }
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
  async fn get(&self, name: &str) -> Result<Option<VersionedRecord>, AppError> {
    match self.fetch_secret(name).await? {
      None => Ok(None),
      Some(secret) => {
        let (record, version) = parse_secret(&secret)?;
        Ok(Some(VersionedRecord { record, version }))
      }
    }
  }

  async fn put(
    &self,
    name: &str,
    record: SecretRecord,
    expected_version: u64,
  ) -> Result<u64, AppError> {
    let next_version = expected_version + 1;

    if expected_version == 0 {
      let body = secret_body(name, &self.namespace, &record, next_version, None);
      let response = self
        .http
        .post(self.secret_url(None))
        .bearer_auth(&self.auth_token)
        .json(&body)
        .send()
        .await
        .map_err(transport_error)?;
      return match response.status() {
        status if status.is_success() => Ok(next_version),
        StatusCode::CONFLICT => Err(
          AppError::conflict(format!("secret {name} already exists"))
            .with_component("secret_store"),
        ),
        status => Err(api_error(status, "create secret")),
      };
    }

    let current = self
      .fetch_secret(name)
      .await?
      .ok_or_else(|| AppError::conflict(format!("secret {name} disappeared during update")))?;
    let (_, stored_version) = parse_secret(&current)?;
    if stored_version != expected_version {
      return Err(
        AppError::conflict(format!(
          "secret {name} at version {stored_version}, write expected {expected_version}"
        ))
        .with_component("secret_store"),
      );
    }
    let resource_version = current
      .pointer("/metadata/resourceVersion")
      .and_then(Value::as_str)
      .ok_or_else(|| AppError::database("secret object missing resourceVersion"))?;

    let body = secret_body(
      name,
      &self.namespace,
      &record,
      next_version,
      Some(resource_version),
    );
    let response = self
      .http
      .put(self.secret_url(Some(name)))
      .bearer_auth(&self.auth_token)
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;

    match response.status() {
      status if status.is_success() => {
        debug!(secret = name, version = next_version, "secret replaced");
        Ok(next_version)
      }
      StatusCode::CONFLICT => Err(
        AppError::conflict(format!("resourceVersion precondition failed for {name}"))
          .with_component("secret_store"),
      ),
      status => Err(api_error(status, "replace secret")),
    }
  }
}

fn transport_error(e: reqwest::Error) -> AppError {
  AppError::wrap(
    ErrorKind::ServiceUnavailable,
    format!("apiserver unreachable: {e}"),
    e,
  )
  .with_component("secret_store")
}

fn api_error(status: StatusCode, operation: &str) -> AppError {
  AppError::database(format!("apiserver returned {status} for {operation}"))
    .with_component("secret_store")
}

/// Encode a record into the `Secret` write shape under the fixed field
/// names the platform's tooling expects.
fn secret_body(
  name: &str,
  namespace: &str,
  record: &SecretRecord,
  version: u64,
  resource_version: Option<&str>,
) -> Value {
  let mut metadata = json!({
    "name": name,
    "namespace": namespace,
  });
  if let Some(rv) = resource_version {
    metadata["resourceVersion"] = Value::String(rv.to_string());
  }
  let mut data = serde_json::Map::new();
  data.insert(FIELD_TOKEN_DATA.into(), BASE64.encode(&record.token_data).into());
  data.insert(
    FIELD_ACCESS_TOKEN.into(),
    BASE64.encode(&record.access_token).into(),
  );
  data.insert(
    FIELD_REFRESH_TOKEN.into(),
    BASE64.encode(&record.refresh_token).into(),
  );
  data.insert(FIELD_EXPIRES_AT.into(), BASE64.encode(&record.expires_at).into());
  data.insert(
    FIELD_ROTATION_METADATA.into(),
    BASE64.encode(&record.rotation_metadata).into(),
  );
  data.insert(FIELD_VERSION.into(), BASE64.encode(version.to_string()).into());

  json!({
    "apiVersion": "v1",
    "kind": "Secret",
    "metadata": metadata,
    "type": "Opaque",
    "data": data,
  })
}

fn parse_secret(secret: &Value) -> Result<(SecretRecord, u64), AppError> {
  let data = secret
    .get("data")
    .and_then(Value::as_object)
    .ok_or_else(|| AppError::database("secret object has no data"))?;

  let field = |name: &str| -> Result<String, AppError> {
    let encoded = data
      .get(name)
      .and_then(Value::as_str)
      .ok_or_else(|| AppError::database(format!("secret data missing field {name}")))?;
    let bytes = BASE64
      .decode(encoded)
      .map_err(|e| AppError::wrap(ErrorKind::Database, format!("field {name} not base64"), e))?;
    String::from_utf8(bytes)
      .map_err(|e| AppError::wrap(ErrorKind::Database, format!("field {name} not utf-8"), e))
  };

  let record = SecretRecord {
    token_data: field(FIELD_TOKEN_DATA)?,
    access_token: field(FIELD_ACCESS_TOKEN)?,
    refresh_token: field(FIELD_REFRESH_TOKEN)?,
    expires_at: field(FIELD_EXPIRES_AT)?,
    rotation_metadata: field(FIELD_ROTATION_METADATA)?,
  };
  let version = field(FIELD_VERSION)?
    .parse::<u64>()
    .map_err(|e| AppError::wrap(ErrorKind::Database, "secret version not a number", e))?;
  Ok((record, version))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> SecretRecord {
    SecretRecord {
      token_data: r#"{"version":3}"#.into(),
      access_token: "at".into(),
      refresh_token: "rt".into(),
      expires_at: "2026-08-01T00:00:00+00:00".into(),
      rotation_metadata: String::new(),
    }
  }

  #[test]
  fn secret_body_round_trips_through_parse() {
    let body = secret_body("inoreader-token", "newsloom", &record(), 3, Some("8181"));
    assert_eq!(body["metadata"]["resourceVersion"], "8181");

    let (parsed, version) = parse_secret(&body).unwrap();
    assert_eq!(parsed, record());
    assert_eq!(version, 3);
  }

  #[test]
  fn create_body_omits_resource_version() {
    let body = secret_body("inoreader-token", "newsloom", &record(), 1, None);
    assert!(body["metadata"].get("resourceVersion").is_none());
  }

  #[test]
  fn parse_rejects_missing_fields() {
    let secret = json!({"data": {"token_data": BASE64.encode("{}")}});
    assert!(parse_secret(&secret).is_err());
  }
}
