//! # Structured Logging Module
//!
//! Console logging for reconciliation runs, as human-readable text or one JSON
//! object per line for log shippers. `RUST_LOG` always wins over the
//! verbosity-derived default level.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogFormat;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Subsequent calls are no-ops.
pub fn init_structured_logging(format: LogFormat, verbosity: u8) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)))
        };

        let layer = match format {
            LogFormat::Text => fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter())
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(filter())
                .boxed(),
        };

        // A global subscriber may already exist (tests, embedding binaries)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::debug!(format = %format, verbosity, "Structured logging initialized");
    });
}

fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Log one reconciliation decision or outcome for a single resource
pub fn log_reap_operation(
    resource: &str,
    operation: &str,
    name: &str,
    id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        resource = %resource,
        operation = %operation,
        name = %name,
        id = id,
        status = %status,
        details = details,
        "REAP_OPERATION"
    );
}

/// Log a failure with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        "ERROR"
    );
}
