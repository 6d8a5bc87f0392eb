use anyhow::{bail, Result};
use newsloom_core::models::token::DEFAULT_CLOCK_SKEW_SECONDS;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct SidecarConfig {
  pub server: ServerConfig,
  pub oauth: OAuthConfig,
  pub store: StoreConfig,
  #[validate(length(min = 1))]
  pub credentials: Vec<CredentialConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  pub port: u16,
  #[serde(default = "default_metrics_port")]
  pub metrics_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OAuthConfig {
  pub token_url: String,
  pub client_id: String,
  pub client_secret: String,
  /// Refresh requests tolerate slow IdPs behind the forward proxy.
  #[serde(default = "default_request_timeout_seconds")]
  pub request_timeout_seconds: u64,
  #[serde(default = "default_clock_skew_seconds")]
  pub clock_skew_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
  Kubernetes(KubernetesStoreConfig),
  Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KubernetesStoreConfig {
  pub api_url: String,
  pub namespace: String,
  #[serde(default = "default_token_path")]
  pub service_account_token_path: String,
  #[serde(default = "default_store_timeout_seconds")]
  pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CredentialConfig {
  /// Secret-store key for this credential.
  pub name: String,
  /// How long a handed-out token must stay valid for this consumer.
  #[serde(default = "default_refresh_buffer_seconds")]
  pub refresh_buffer_seconds: i64,
  #[serde(default = "default_put_retries")]
  pub max_put_retries: u32,
  /// Enables the periodic refresh task for this credential.
  #[serde(default)]
  pub proactive_refresh: bool,
}

fn default_metrics_port() -> u16 {
  9094
}

fn default_request_timeout_seconds() -> u64 {
  90
}

fn default_clock_skew_seconds() -> i64 {
  DEFAULT_CLOCK_SKEW_SECONDS
}

fn default_token_path() -> String {
  "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_store_timeout_seconds() -> u64 {
  10
}

fn default_refresh_buffer_seconds() -> i64 {
  300
}

fn default_put_retries() -> u32 {
  3
}

impl SidecarConfig {
  /// Read from ./sidecar.yml, /etc/config/sidecar.yml, or the path in
  /// SIDECAR_CONFIG. `OAUTH2_CLOCK_SKEW_SECONDS` overrides the file value.
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<SidecarConfig, serde_yaml::Error> = match (
      File::open("sidecar.yml"),
      File::open("/etc/config/sidecar.yml"),
      env::var("SIDECAR_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found"),
    };

    let mut config = ret?;
    if let Ok(skew) = env::var("OAUTH2_CLOCK_SKEW_SECONDS") {
      config.oauth.clock_skew_seconds = skew.parse()?;
    }
    config.validate()?;
    Ok(config)
  }

  /// Configuration summary with secret material elided.
  pub fn get_summary(&self) -> String {
    format!(
      "credential_sidecar: {} credential(s), provider {}, skew {}s, port {}",
      self.credentials.len(),
      self.oauth.token_url,
      self.oauth.clock_skew_seconds,
      self.server.port,
    )
  }
}
