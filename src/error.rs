use crate::app_state::AppPaths;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Errors surfaced by the command gateway. Downstream failures pass through
/// untouched; only routing and payload problems get their own variants.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("unknown command: {0}")]
  UnknownCommand(String),
  #[error("unknown app store key: {0}")]
  UnknownStoreKey(String),
  #[error("invalid payload for {command}: {source}")]
  InvalidPayload {
    command: &'static str,
    #[source]
    source: serde_json::Error,
  },
  #[error(transparent)]
  Downstream(#[from] anyhow::Error),
}

pub fn init_tracing(paths: &AppPaths) -> anyhow::Result<()> {
  // Rotate daily; keep logs in app data dir so they are easy to find.
  let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "mediadock.jsonl");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  let _ = LOG_GUARD.set(guard);

  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,reqwest=warn,hyper=warn"));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(non_blocking)
    .json()
    .with_current_span(true)
    .with_span_list(true)
    .init();

  Ok(())
}
