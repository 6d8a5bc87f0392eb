use std::sync::Arc;

use anyhow::Result;
use credential_sidecar::config::{SidecarConfig, StoreConfig};
use credential_sidecar::lifecycle::manager::{RefreshPolicy, TokenLifecycleManager};
use credential_sidecar::lifecycle::registry::CredentialRegistry;
use credential_sidecar::oauth::client::OAuth2ProviderClient;
use credential_sidecar::oauth::RefreshProvider;
use credential_sidecar::store::KubernetesSecretStore;
use credential_sidecar::get_router;
use metrics_exporter_prometheus::PrometheusBuilder;
use newsloom_core::contracts::{MemorySecretStore, SecretStore};
use newsloom_core::observability::metrics::register_core_metrics;
use newsloom_core::TraceContextLayer;
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{
  fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[tokio::main]
async fn main() -> Result<()> {
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::INFO.into())
    .from_env_lossy();
  tracing_subscriber::registry()
    .with(filter)
    .with(TraceContextLayer)
    .with(fmt::layer())
    .init();

  let config = match SidecarConfig::load() {
    Ok(config) => {
      info!("{}", config.get_summary());
      config
    }
    Err(e) => {
      eprintln!("Failed to load configuration: {e}");
      eprintln!("Set SIDECAR_CONFIG=/path/to/sidecar.yml or place sidecar.yml in the workdir");
      std::process::exit(1);
    }
  };

  register_core_metrics();
  PrometheusBuilder::new()
    .with_http_listener(([0, 0, 0, 0], config.server.metrics_port))
    .install()?;

  let store: Arc<dyn SecretStore> = match &config.store {
    StoreConfig::Kubernetes(k8s) => Arc::new(KubernetesSecretStore::new(k8s)?),
    StoreConfig::Memory => {
      warn!("using in-memory secret store; tokens will not survive restart");
      Arc::new(MemorySecretStore::new())
    }
  };
  let provider: Arc<dyn RefreshProvider> = Arc::new(OAuth2ProviderClient::new(&config.oauth)?);

  let registry = Arc::new(CredentialRegistry::new());
  for credential in &config.credentials {
    let manager = Arc::new(TokenLifecycleManager::new(
      credential.name.clone(),
      provider.clone(),
      store.clone(),
      RefreshPolicy::from_config(&config.oauth, credential),
    ));
    if credential.proactive_refresh {
      spawn_proactive_refresh(manager.clone());
    }
    registry.insert(manager);
  }

  let addr = format!("0.0.0.0:{}", config.server.port);
  let app = get_router(registry);
  let listener = TcpListener::bind(&addr).await?;
  info!("credential_sidecar listening on: {}", addr);

  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}

/// Periodic refresh ahead of demand. Purely an optimization: the on-demand
/// path stays correct without it.
fn spawn_proactive_refresh(manager: Arc<TokenLifecycleManager>) {
  tokio::spawn(async move {
    loop {
      let interval = manager.proactive_refresh_interval().await;
      tokio::time::sleep(interval).await;
      if let Err(e) = manager.ensure_valid_token().await {
        warn!(credential = %manager.name(), error = %e, "proactive refresh failed");
      }
    }
  });
}

async fn shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
  info!("shutdown signal received");
}
