//! # Logging
//!
//! Installs the global tracing subscriber.

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "kubed=info";

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default `kubed=info` filter. Calling this twice is
/// harmless; the second install is reported and ignored.
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    if let Err(e) = result {
        tracing::warn!("Tracing subscriber already initialized: {}", e);
    }
}
