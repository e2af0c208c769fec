//! Mesh client configuration.
//!
//! Configuration is loaded from environment variables. The TURN credential
//! is redacted in Debug output.

use crate::media::endpoint::{EndpointConfig, IceServerConfig};
use crate::signaling::SignalingSettings;
use common::config::ObservabilityConfig;
use common::secret::TurnCredential;
use common::types::{MeetingId, UserId};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default STUN server.
pub const DEFAULT_STUN_URL: &str = "stun:stun.relay.metered.ca:80";

/// Default TURN servers (UDP, TCP and TLS variants of the same relay).
pub const DEFAULT_TURN_URLS: [&str; 4] = [
    "turn:global.relay.metered.ca:80",
    "turn:global.relay.metered.ca:80?transport=tcp",
    "turn:global.relay.metered.ca:443",
    "turns:global.relay.metered.ca:443?transport=tcp",
];

/// Default display name when none is configured.
pub const DEFAULT_USERNAME: &str = "guest";

/// Default health timer for an unresolved connection attempt.
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5000;

/// Default ICE restart budget before a full recreation.
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Default base of the ICE restart backoff (`base * 2^attempt`).
pub const DEFAULT_RESTART_BASE_DELAY_MS: u64 = 1000;

/// Default settle delay between closing and recreating an endpoint.
pub const DEFAULT_RECREATE_SETTLE_MS: u64 = 1000;

/// Default delay between recreating an endpoint and sending its offer.
pub const DEFAULT_OFFER_DELAY_MS: u64 = 2000;

/// Default membership roster poll interval.
pub const DEFAULT_ROSTER_POLL_SECS: u64 = 10;

/// Default signaling reconnect attempts before giving up.
pub const DEFAULT_SIGNALING_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay between signaling reconnect attempts.
pub const DEFAULT_SIGNALING_RECONNECT_DELAY_MS: u64 = 1000;

/// Default WebSocket connect timeout.
pub const DEFAULT_SIGNALING_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default tracing filter for the client binary.
pub const DEFAULT_LOG_FILTER: &str = "mesh_client=debug";

/// Timing constants that drive the connection lifecycle.
///
/// Built from [`Config`] in production; tests construct it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimings {
    /// How long a connection attempt may stay unresolved.
    pub health_timeout: Duration,
    /// ICE restarts allowed before a full recreation.
    pub max_restart_attempts: u32,
    /// Base of the restart backoff.
    pub restart_base_delay: Duration,
    /// Recreate delay when an ICE restart itself errors.
    pub restart_failure_recreate_delay: Duration,
    /// Recreate delay once the restart budget is spent.
    pub exhausted_recreate_delay: Duration,
    /// Recreate delay after an overall `failed` peer state.
    pub peer_failed_recreate_delay: Duration,
    /// Settle delay between teardown and re-creation.
    pub recreate_settle_delay: Duration,
    /// Delay before the first offer on a recreated endpoint.
    pub recreate_offer_delay: Duration,
    /// Delay before offering to a participant that just joined.
    pub join_offer_delay: Duration,
    /// Membership roster poll period.
    pub roster_poll_interval: Duration,
    /// Force-reconnect pause after media restart, before `leave`.
    pub reconnect_leave_delay: Duration,
    /// Force-reconnect pause between `leave` and `join`.
    pub reconnect_join_delay: Duration,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_base_delay: Duration::from_millis(DEFAULT_RESTART_BASE_DELAY_MS),
            restart_failure_recreate_delay: Duration::from_secs(2),
            exhausted_recreate_delay: Duration::from_secs(5),
            peer_failed_recreate_delay: Duration::from_secs(3),
            recreate_settle_delay: Duration::from_millis(DEFAULT_RECREATE_SETTLE_MS),
            recreate_offer_delay: Duration::from_millis(DEFAULT_OFFER_DELAY_MS),
            join_offer_delay: Duration::from_millis(100),
            roster_poll_interval: Duration::from_secs(DEFAULT_ROSTER_POLL_SECS),
            reconnect_leave_delay: Duration::from_secs(1),
            reconnect_join_delay: Duration::from_millis(500),
        }
    }
}

impl ConnectionTimings {
    /// Backoff before restart number `attempt` (1-based): `base * 2^attempt`.
    #[must_use]
    pub fn restart_backoff(&self, attempt: u32) -> Duration {
        self.restart_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Mesh client configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket URL of the signaling relay.
    pub signaling_url: String,

    /// Base URL of the membership REST service.
    pub api_base_url: String,

    /// Existing user id. When absent the client registers `username`.
    pub user_id: Option<UserId>,

    /// Display name.
    pub username: String,

    /// Meeting to join. When absent the client creates one and hosts it.
    pub meeting_id: Option<MeetingId>,

    /// STUN server URLs.
    pub stun_urls: Vec<String>,

    /// TURN server URLs. Only used when `turn_credential` is set.
    pub turn_urls: Vec<String>,

    /// TURN username and credential.
    pub turn_credential: Option<TurnCredential>,

    pub health_timeout_ms: u64,
    pub max_restart_attempts: u32,
    pub restart_base_delay_ms: u64,
    pub recreate_settle_ms: u64,
    pub offer_delay_ms: u64,
    pub roster_poll_secs: u64,

    pub signaling_reconnect_attempts: u32,
    pub signaling_reconnect_delay_ms: u64,
    pub signaling_connect_timeout_ms: u64,

    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts the TURN credential.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("signaling_url", &self.signaling_url)
            .field("api_base_url", &self.api_base_url)
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("meeting_id", &self.meeting_id)
            .field("stun_urls", &self.stun_urls)
            .field("turn_urls", &self.turn_urls)
            .field(
                "turn_credential",
                &self.turn_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("max_restart_attempts", &self.max_restart_attempts)
            .field("restart_base_delay_ms", &self.restart_base_delay_ms)
            .field("recreate_settle_ms", &self.recreate_settle_ms)
            .field("offer_delay_ms", &self.offer_delay_ms)
            .field("roster_poll_secs", &self.roster_poll_secs)
            .field(
                "signaling_reconnect_attempts",
                &self.signaling_reconnect_attempts,
            )
            .field(
                "signaling_reconnect_delay_ms",
                &self.signaling_reconnect_delay_ms,
            )
            .field(
                "signaling_connect_timeout_ms",
                &self.signaling_connect_timeout_ms,
            )
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_number<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "{name} must be a valid non-negative integer, got '{value_str}': {e}"
            ))
        }),
        None => Ok(default),
    }
}

fn parse_list(vars: &HashMap<String, String>, name: &str, default: &[&str]) -> Vec<String> {
    match vars.get(name) {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        None => default.iter().map(ToString::to_string).collect(),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = vars
            .get("MESH_SIGNALING_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MESH_SIGNALING_URL".to_string()))?
            .clone();

        if !(signaling_url.starts_with("ws://") || signaling_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "MESH_SIGNALING_URL must be a ws:// or wss:// URL, got '{signaling_url}'"
            )));
        }

        let api_base_url = vars
            .get("MESH_API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MESH_API_BASE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let user_id = vars
            .get("MESH_USER_ID")
            .filter(|v| !v.is_empty())
            .map(|v| UserId::from(v.as_str()));

        let username = vars
            .get("MESH_USERNAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string());

        let meeting_id = vars
            .get("MESH_MEETING_ID")
            .filter(|v| !v.is_empty())
            .map(|v| MeetingId::from(v.as_str()));

        let stun_urls = parse_list(vars, "MESH_STUN_URLS", &[DEFAULT_STUN_URL]);
        let turn_urls = parse_list(vars, "MESH_TURN_URLS", &DEFAULT_TURN_URLS);

        // Both halves are required; a lone username or credential is ignored.
        let turn_credential = match (
            vars.get("MESH_TURN_USERNAME"),
            vars.get("MESH_TURN_CREDENTIAL"),
        ) {
            (Some(user), Some(credential)) => Some(TurnCredential::new(user, credential)),
            _ => None,
        };

        let health_timeout_ms =
            parse_number(vars, "MESH_HEALTH_TIMEOUT_MS", DEFAULT_HEALTH_TIMEOUT_MS)?;
        if health_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_HEALTH_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let max_restart_attempts = parse_number(
            vars,
            "MESH_MAX_RESTART_ATTEMPTS",
            DEFAULT_MAX_RESTART_ATTEMPTS,
        )?;
        let restart_base_delay_ms = parse_number(
            vars,
            "MESH_RESTART_BASE_DELAY_MS",
            DEFAULT_RESTART_BASE_DELAY_MS,
        )?;
        let recreate_settle_ms =
            parse_number(vars, "MESH_RECREATE_SETTLE_MS", DEFAULT_RECREATE_SETTLE_MS)?;
        let offer_delay_ms = parse_number(vars, "MESH_OFFER_DELAY_MS", DEFAULT_OFFER_DELAY_MS)?;

        let roster_poll_secs =
            parse_number(vars, "MESH_ROSTER_POLL_SECS", DEFAULT_ROSTER_POLL_SECS)?;
        if roster_poll_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_ROSTER_POLL_SECS must be greater than 0".to_string(),
            ));
        }

        let signaling_reconnect_attempts = parse_number(
            vars,
            "MESH_SIGNALING_RECONNECT_ATTEMPTS",
            DEFAULT_SIGNALING_RECONNECT_ATTEMPTS,
        )?;
        let signaling_reconnect_delay_ms = parse_number(
            vars,
            "MESH_SIGNALING_RECONNECT_DELAY_MS",
            DEFAULT_SIGNALING_RECONNECT_DELAY_MS,
        )?;
        let signaling_connect_timeout_ms = parse_number(
            vars,
            "MESH_SIGNALING_CONNECT_TIMEOUT_MS",
            DEFAULT_SIGNALING_CONNECT_TIMEOUT_MS,
        )?;

        let observability = ObservabilityConfig::from_vars(vars, DEFAULT_LOG_FILTER);

        Ok(Config {
            signaling_url,
            api_base_url,
            user_id,
            username,
            meeting_id,
            stun_urls,
            turn_urls,
            turn_credential,
            health_timeout_ms,
            max_restart_attempts,
            restart_base_delay_ms,
            recreate_settle_ms,
            offer_delay_ms,
            roster_poll_secs,
            signaling_reconnect_attempts,
            signaling_reconnect_delay_ms,
            signaling_connect_timeout_ms,
            observability,
        })
    }

    /// Lifecycle timings derived from this configuration.
    #[must_use]
    pub fn timings(&self) -> ConnectionTimings {
        ConnectionTimings {
            health_timeout: Duration::from_millis(self.health_timeout_ms),
            max_restart_attempts: self.max_restart_attempts,
            restart_base_delay: Duration::from_millis(self.restart_base_delay_ms),
            recreate_settle_delay: Duration::from_millis(self.recreate_settle_ms),
            recreate_offer_delay: Duration::from_millis(self.offer_delay_ms),
            roster_poll_interval: Duration::from_secs(self.roster_poll_secs),
            ..ConnectionTimings::default()
        }
    }

    /// Signaling transport settings derived from this configuration.
    #[must_use]
    pub fn signaling_settings(&self) -> SignalingSettings {
        SignalingSettings {
            connect_timeout: Duration::from_millis(self.signaling_connect_timeout_ms),
            reconnect_attempts: self.signaling_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.signaling_reconnect_delay_ms),
            ..SignalingSettings::default()
        }
    }

    /// STUN/TURN hints handed to every media endpoint.
    #[must_use]
    pub fn endpoint_config(&self) -> EndpointConfig {
        let mut ice_servers = Vec::new();
        if !self.stun_urls.is_empty() {
            ice_servers.push(IceServerConfig {
                urls: self.stun_urls.clone(),
                credential: None,
            });
        }
        if let Some(credential) = &self.turn_credential {
            if !self.turn_urls.is_empty() {
                ice_servers.push(IceServerConfig {
                    urls: self.turn_urls.clone(),
                    credential: Some(credential.clone()),
                });
            }
        }
        EndpointConfig { ice_servers }
    }
}
