use std::io;
/// Structured logging utilities for bima
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Variable holding the log filter; `RUST_LOG` is used when unset.
pub const LOG_ENV_VAR: &str = "BIMA_LOG";

/// Initialize structured logging with optional JSON output
pub fn init_logging(json_output: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default().with(env_filter());

    if json_output {
        // JSON output for log aggregation in CI pipelines
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("bima=info"))
}

#[macro_export]
macro_rules! log_operation_applied {
    ($op:expr) => {
        tracing::debug!(kind = %$op.kind(), line = $op.line(), "{}", $op.info());
    };
}

#[macro_export]
macro_rules! log_build_start {
    ($containerfile:expr) => {
        tracing::info!(containerfile = %$containerfile, "Build started");
    };
}

#[macro_export]
macro_rules! log_build_complete {
    ($duration_ms:expr, $layers:expr, $class:expr) => {
        tracing::info!(
            duration_ms = $duration_ms,
            layers = $layers,
            class = %$class,
            "Build completed"
        );
    };
}
