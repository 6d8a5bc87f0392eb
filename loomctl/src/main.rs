use clap::Parser;
use loomctl::cli::{run, Cli};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
  // Diagnostics go to stderr; stdout stays machine-parseable for --json.
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::WARN.into())
    .from_env_lossy();
  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .init();

  let cli = Cli::parse();
  std::process::exit(run(cli));
}
