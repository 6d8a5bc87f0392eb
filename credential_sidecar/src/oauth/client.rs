use std::time::Duration;

use async_trait::async_trait;
use newsloom_core::{AppError, ErrorKind, TokenRefreshResponse};
use serde::Deserialize;
use tracing::warn;

use super::RefreshProvider;
use crate::config::OAuthConfig;

/// Standard OAuth2 error body (`{error, error_description}`).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
  #[serde(default)]
  error: String,
  #[serde(default)]
  error_description: Option<String>,
}

/// Client for the provider's `POST /oauth2/token` refresh grant.
pub struct OAuth2ProviderClient {
  http: reqwest::Client,
  token_url: String,
  client_id: String,
  client_secret: String,
}

impl OAuth2ProviderClient {
  pub fn new(config: &OAuthConfig) -> Result<Self, AppError> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_seconds))
      .build()
      .map_err(|e| AppError::wrap(ErrorKind::Config, "failed to build http client", e))?;
    Ok(Self {
      http,
      token_url: config.token_url.clone(),
      client_id: config.client_id.clone(),
      client_secret: config.client_secret.clone(),
    })
  }
}

#[async_trait]
impl RefreshProvider for OAuth2ProviderClient {
  async fn refresh(&self, refresh_token: &str) -> Result<TokenRefreshResponse, AppError> {
    let params = [
      ("grant_type", "refresh_token"),
      ("refresh_token", refresh_token),
      ("client_id", self.client_id.as_str()),
      ("client_secret", self.client_secret.as_str()),
    ];

    let response = self
      .http
      .post(&self.token_url)
      .form(&params)
      .send()
      .await
      .map_err(|e| {
        AppError::wrap(
          ErrorKind::ServiceUnavailable,
          format!("token endpoint unreachable: {e}"),
          e,
        )
        .with_component("oauth_provider")
        .with_operation("refresh")
      })?;

    let status = response.status();
    if status.is_success() {
      return response.json::<TokenRefreshResponse>().await.map_err(|e| {
        AppError::wrap(
          ErrorKind::ExternalApi,
          "malformed refresh response from provider",
          e,
        )
        .with_component("oauth_provider")
      });
    }

    let body = response
      .json::<OAuthErrorBody>()
      .await
      .unwrap_or(OAuthErrorBody {
        error: String::new(),
        error_description: None,
      });

    if status.is_client_error() {
      // invalid_grant / invalid_client mean the stored credential is bad;
      // retrying cannot help until an operator reseeds it.
      warn!(
        oauth_error = %body.error,
        status = status.as_u16(),
        "provider refused refresh"
      );
      return Err(
        AppError::invalid_credentials(format!(
          "provider refused refresh ({}): {}",
          body.error,
          body.error_description.unwrap_or_default()
        ))
        .with_component("oauth_provider")
        .with_operation("refresh")
        .with_context("oauth_error", body.error),
      );
    }

    Err(
      AppError::service_unavailable(format!("provider returned {status} for refresh"))
        .with_component("oauth_provider")
        .with_operation("refresh"),
    )
  }
}
