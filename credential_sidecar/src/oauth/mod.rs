pub mod client;

use async_trait::async_trait;
use newsloom_core::{AppError, TokenRefreshResponse};

/// The provider-facing side of a refresh. Abstracted so the lifecycle
/// manager can be exercised against counting fakes in tests.
#[async_trait]
pub trait RefreshProvider: Send + Sync {
  async fn refresh(&self, refresh_token: &str) -> Result<TokenRefreshResponse, AppError>;
}
