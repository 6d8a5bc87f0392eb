use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use newsloom_core::observability::metrics::register_core_metrics;
use newsloom_core::TraceContextLayer;
use newsloom_gateway::{get_router, GatewayConfig};
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

  let config = match GatewayConfig::load() {
    Ok(config) => {
      info!("{}", config.get_summary());
      config
    }
    Err(e) => {
      eprintln!("Failed to load configuration: {e}");
      eprintln!("Set GATEWAY_CONFIG=/path/to/gateway.yml or place gateway.yml in the workdir");
      std::process::exit(1);
    }
  };

  register_core_metrics();
  PrometheusBuilder::new()
    .with_http_listener(([0, 0, 0, 0], config.server.metrics_port))
    .install()?;

  let addr = format!("0.0.0.0:{}", config.server.port);
  let app = get_router(&config)?;
  let listener = TcpListener::bind(&addr).await?;
  info!("newsloom_gateway listening on: {}", addr);

  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}

async fn shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
  info!("shutdown signal received");
}
