#![forbid(unsafe_code)]

//! Fleet command-and-control broker.
//!
//! Remote agents connect over raw TCP and become sessions; a single
//! operator channel, reached over an outbound WebSocket, sends commands
//! addressed to one session at a time and receives each agent's output.

pub mod agent;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod queue;
pub mod registry;

pub use broker::Broker;
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
