//! Shared broker state handed to every task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GlobalConfig;
use crate::models::session::{Session, SessionId};
use crate::queue::CommandQueue;
use crate::registry::SessionRegistry;
use crate::Result;

/// Process-wide state: configuration, session registry, output queue,
/// session id counter and the root shutdown token.
#[derive(Debug)]
pub struct Broker {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Live sessions.
    pub registry: SessionRegistry,
    /// Serialized envelopes waiting for the operator channel.
    pub output: CommandQueue,
    /// Root cancellation; every session token is a child of it.
    pub shutdown: CancellationToken,
    next_session: AtomicU64,
}

impl Broker {
    /// Build broker state from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the registry cannot be created.
    pub fn new(config: GlobalConfig, shutdown: CancellationToken) -> Result<Arc<Self>> {
        let registry = SessionRegistry::new(config.registry_buckets)?;
        let output = CommandQueue::new(config.queue_wait());
        debug!(
            buckets = registry.bucket_count(),
            queue_wait_ms = u64::try_from(output.wait().as_millis()).unwrap_or(u64::MAX),
            "broker state created"
        );
        Ok(Arc::new(Self {
            config: Arc::new(config),
            registry,
            output,
            shutdown,
            next_session: AtomicU64::new(0),
        }))
    }

    /// Allocate the next session id (`cli1`, `cli2`, ...).
    pub fn next_session_id(&self) -> SessionId {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        SessionId::from_sequence(n)
    }

    /// Create (but do not register) a session for a new connection.
    pub fn new_session(&self, address: impl Into<String>) -> Arc<Session> {
        Arc::new(Session::new(
            self.next_session_id(),
            address,
            CommandQueue::new(self.config.queue_wait()),
            self.shutdown.child_token(),
        ))
    }

    /// This broker's endpoint name.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.config.identity.broker
    }

    /// The operator channel's endpoint name.
    #[must_use]
    pub fn operator(&self) -> &str {
        &self.config.identity.operator
    }
}
