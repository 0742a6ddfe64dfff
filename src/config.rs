//! Global configuration parsing and validation.
//!
//! Every field has a default, so an empty TOML document yields the
//! built-in broker constants (port 3333, 2048-byte messages, 100 registry
//! buckets, 5 pending accepts, 5 ms queue wait).

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How commands and replies are delimited on the agent TCP link.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentFraming {
    /// No framing: one write per command, one read per reply.
    #[default]
    Raw,
    /// 4-byte big-endian length prefix in both directions.
    LengthPrefixed,
}

/// Agent-facing TCP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Address the accept loop binds to.
    pub listen_addr: SocketAddr,
    /// Listen backlog (maximum connections pending accept).
    pub max_pending_accepts: u32,
    /// Wire framing used with agents.
    pub framing: AgentFraming,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3333)),
            max_pending_accepts: 5,
            framing: AgentFraming::Raw,
        }
    }
}

/// Outbound operator-channel (WebSocket) settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct BridgeConfig {
    /// Operator bridge host name.
    pub host: String,
    /// Operator bridge TCP port.
    pub port: u16,
    /// Request path used in the opening handshake.
    pub path: String,
    /// `Origin` header value; omitted when empty.
    pub origin: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_seconds: u64,
    /// Cap for the doubling reconnect delay.
    pub max_reconnect_delay_seconds: u64,
    /// Upper bound for the opening handshake.
    pub handshake_timeout_seconds: u64,
    /// Largest inbound WebSocket message accepted.
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            path: "/".into(),
            origin: "localhost".into(),
            reconnect_delay_seconds: 5,
            max_reconnect_delay_seconds: 60,
            handshake_timeout_seconds: 10,
            max_frame_bytes: 1_048_576,
        }
    }
}

impl BridgeConfig {
    /// `host:port` string used for connecting.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    /// Upper bound for the reconnect delay.
    #[must_use]
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_seconds)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

/// Logical endpoint names carried in envelope `source` / `destination`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct IdentityConfig {
    /// This broker's own endpoint name.
    pub broker: String,
    /// The operator channel's endpoint name.
    pub operator: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            broker: "MAIN".into(),
            operator: "FRONTEND".into(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Number of session registry buckets.
    pub registry_buckets: usize,
    /// Maximum envelope payload and agent reply size, in bytes.
    pub max_message_bytes: usize,
    /// Bounded wait of a command queue pop, in milliseconds.
    pub queue_wait_ms: u64,
    /// Agent listener settings.
    pub agent: AgentConfig,
    /// Operator bridge settings.
    pub bridge: BridgeConfig,
    /// Endpoint identities.
    pub identity: IdentityConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            registry_buckets: 100,
            max_message_bytes: 2048,
            queue_wait_ms: 5,
            agent: AgentConfig::default(),
            bridge: BridgeConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Bounded wait used by every command queue.
    #[must_use]
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.registry_buckets == 0 {
            return Err(AppError::Config(
                "registry_buckets must be greater than zero".into(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(AppError::Config(
                "max_message_bytes must be greater than zero".into(),
            ));
        }
        if self.queue_wait_ms == 0 {
            return Err(AppError::Config(
                "queue_wait_ms must be greater than zero".into(),
            ));
        }
        if self.agent.max_pending_accepts == 0 {
            return Err(AppError::Config(
                "agent.max_pending_accepts must be greater than zero".into(),
            ));
        }
        if self.bridge.host.trim().is_empty() {
            return Err(AppError::Config("bridge.host must not be empty".into()));
        }
        if self.bridge.max_reconnect_delay_seconds < self.bridge.reconnect_delay_seconds {
            return Err(AppError::Config(
                "bridge.max_reconnect_delay_seconds must be at least reconnect_delay_seconds"
                    .into(),
            ));
        }
        if self.bridge.max_frame_bytes < self.max_message_bytes {
            return Err(AppError::Config(
                "bridge.max_frame_bytes must be at least max_message_bytes".into(),
            ));
        }
        if self.identity.broker.is_empty() || self.identity.operator.is_empty() {
            return Err(AppError::Config("identity names must not be empty".into()));
        }
        if self.identity.broker == self.identity.operator {
            return Err(AppError::Config(
                "broker and operator identities must differ".into(),
            ));
        }
        Ok(())
    }
}
