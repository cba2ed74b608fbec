//! Subscriber installation.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "medflow=info".into())
}

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `medflow=info`.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn try_init_tracing(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let registry = tracing_subscriber::registry().with(filter());
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}

/// Installs the global subscriber, ignoring a second installation.
pub fn init_tracing(format: LogFormat) {
    if let Err(e) = try_init_tracing(format) {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
