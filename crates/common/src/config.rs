//! Configuration shared by the mesh binaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Fallback `EnvFilter` directive used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl ObservabilityConfig {
    /// Build from a variable map. `MESH_LOG_JSON` accepts `true`/`1`.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let json_logs = vars
            .get("MESH_LOG_JSON")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"));

        Self {
            log_filter: default_filter.to_string(),
            json_logs,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_logs_flag() {
        let vars = HashMap::from([("MESH_LOG_JSON".to_string(), "TRUE".to_string())]);
        let config = ObservabilityConfig::from_vars(&vars, "mesh_client=debug");
        assert!(config.json_logs);
        assert_eq!(config.log_filter, "mesh_client=debug");

        let config = ObservabilityConfig::from_vars(&HashMap::new(), "info");
        assert!(!config.json_logs);
    }
}
