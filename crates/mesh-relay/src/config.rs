//! Relay configuration.
//!
//! Configuration is loaded from environment variables.

use common::config::ObservabilityConfig;
use mesh_protocol::codec::DEFAULT_MAX_FRAME_BYTES;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5002";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "mesh_relay=debug";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket listener (`/ws`).
    pub bind_address: String,

    /// Health and metrics listener.
    pub health_bind_address: String,

    /// Largest accepted text frame.
    pub max_frame_bytes: usize,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from a variable map.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("MESH_RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("MESH_RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_frame_bytes = match vars.get("MESH_RELAY_MAX_FRAME_BYTES") {
            Some(value) => {
                let parsed: usize = value.trim().parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "MESH_RELAY_MAX_FRAME_BYTES must be a positive integer, got '{value}': {e}"
                    ))
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidValue(
                        "MESH_RELAY_MAX_FRAME_BYTES must be greater than 0".to_string(),
                    ));
                }
                parsed
            }
            None => DEFAULT_MAX_FRAME_BYTES,
        };

        Ok(Self {
            bind_address,
            health_bind_address,
            max_frame_bytes,
            observability: ObservabilityConfig::from_vars(vars, DEFAULT_LOG_FILTER),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.observability.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_custom_values() {
        let vars = HashMap::from([
            ("MESH_RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("MESH_RELAY_MAX_FRAME_BYTES".to_string(), "1024".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.max_frame_bytes, 1024);
    }

    #[test]
    fn test_invalid_frame_limit() {
        for bad in ["abc", "0", "-1"] {
            let vars = HashMap::from([(
                "MESH_RELAY_MAX_FRAME_BYTES".to_string(),
                bad.to_string(),
            )]);
            assert!(matches!(
                Config::from_vars(&vars),
                Err(ConfigError::InvalidValue(_))
            ));
        }
    }
}
