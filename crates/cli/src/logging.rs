//! Logging setup for the CLI and worker processes.

use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

fn env_filter(level: &str) -> EnvFilter {
  // RUST_LOG overrides the configured level.
  EnvFilter::builder()
    .with_default_directive(parse_log_level(level).into())
    .from_env_lossy()
}

/// Console logging for the main CLI.
pub fn init_cli_logging(level: &str) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter(level))
    .with_target(false)
    .init();
}

/// Worker logging goes to stderr: stdout carries the endpoint handshake the
/// parent parses, and nothing else.
pub fn init_worker_logging(level: &str) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter(level))
    .with_target(true)
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .init();
}
