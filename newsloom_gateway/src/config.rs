use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use validator::Validate;

/// Gateway configuration. Every recognized option is enumerated here with
/// its default; unknown fields are rejected at load rather than silently
/// ignored.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  #[serde(default)]
  pub security: SecurityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
  pub port: u16,
  #[serde(default = "default_metrics_port")]
  pub metrics_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
  /// Base URL of the auth service. `AUTH_SERVICE_URL` overrides.
  pub service_url: String,
  /// Per-call deadline for session validation. `AUTH_TIMEOUT_MS` overrides.
  #[serde(default = "default_validate_timeout_ms")]
  pub validate_timeout_ms: u64,
  /// Starting phase of the legacy-to-gateway migration.
  #[serde(default = "default_migration_mode")]
  pub migration_mode: String,
  /// Present only while the legacy backend is still reachable. Removing
  /// this block disables hybrid fallback regardless of migration mode.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub legacy: Option<LegacyAuthConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LegacyAuthConfig {
  /// HS256 key for pre-gateway session tokens.
  pub session_secret: String,
  /// HMAC key for pre-gateway CSRF tokens.
  pub csrf_secret: String,
  #[serde(default = "default_csrf_ttl_seconds")]
  pub csrf_ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
  /// Adds `Strict-Transport-Security` on every response.
  #[serde(default = "default_true")]
  pub hsts: bool,
  /// Emitted verbatim as `Content-Security-Policy` when set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_security_policy: Option<String>,
  /// Browser origins allowed to call the API. Empty disables CORS.
  #[serde(default)]
  pub cors_allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
  fn default() -> Self {
    Self {
      hsts: true,
      content_security_policy: None,
      cors_allowed_origins: Vec::new(),
    }
  }
}

fn default_metrics_port() -> u16 {
  9093
}

fn default_validate_timeout_ms() -> u64 {
  5_000
}

fn default_migration_mode() -> String {
  "legacy_only".to_string()
}

fn default_csrf_ttl_seconds() -> i64 {
  3600
}

fn default_true() -> bool {
  true
}

impl GatewayConfig {
  /// Read from ./gateway.yml, /etc/config/gateway.yml, or the path in
  /// GATEWAY_CONFIG, then apply env overrides.
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<GatewayConfig, serde_yaml::Error> = match (
      File::open("gateway.yml"),
      File::open("/etc/config/gateway.yml"),
      env::var("GATEWAY_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found"),
    };

    let mut config = ret?;
    if let Ok(url) = env::var("AUTH_SERVICE_URL") {
      config.auth.service_url = url;
    }
    if let Ok(timeout) = env::var("AUTH_TIMEOUT_MS") {
      config.auth.validate_timeout_ms = timeout.parse()?;
    }
    config.validate()?;
    Ok(config)
  }

  pub fn get_summary(&self) -> String {
    format!(
      "newsloom_gateway: auth at {}, validate timeout {}ms, migration {}, legacy {}",
      self.auth.service_url,
      self.auth.validate_timeout_ms,
      self.auth.migration_mode,
      if self.auth.legacy.is_some() {
        "configured"
      } else {
        "absent"
      },
    )
  }
}
