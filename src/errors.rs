//! Error types shared across the broker.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all broker failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Operator envelope could not be decoded, encoded, or validated.
    Protocol(String),
    /// Text does not have the `cli<n>` session id shape.
    InvalidSessionId(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Registry invariant violation (e.g. duplicate id).
    Registry(String),
    /// Agent link failure (send, receive, framing).
    Agent(String),
    /// Operator channel failure (connect, handshake, framing).
    Bridge(String),
    /// Socket or file-system I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::InvalidSessionId(id) => write!(f, "invalid session id: {id:?}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Bridge(msg) => write!(f, "bridge: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
