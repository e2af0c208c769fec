//! Tracing subscriber initialisation for the mesh binaries.

use crate::config::ObservabilityConfig;
use crate::error::MeshError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_filter`. JSON output is selected by
/// `config.json_logs`.
///
/// # Errors
///
/// Returns `MeshError::Configuration` if a global subscriber is already set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), MeshError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| MeshError::Configuration(format!("tracing init failed: {e}")))
}
