//! Session model: identifier, live session state, list summaries.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::CommandQueue;
use crate::{AppError, Result};

/// Tag every session id starts with.
pub const SESSION_ID_TAG: &str = "cli";

/// Identifier of one connected agent, shaped `cli<n>`.
///
/// Any string that starts with [`SESSION_ID_TAG`] and is at least four
/// bytes long is accepted, so ids received from the operator can be
/// looked up without further interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Build the id for the `n`th accepted connection.
    #[must_use]
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("{SESSION_ID_TAG}{n}"))
    }

    /// Validate untrusted text as a session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSessionId` when the text is shorter than
    /// four bytes or does not start with the tag.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() > SESSION_ID_TAG.len() && raw.starts_with(SESSION_ID_TAG) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(AppError::InvalidSessionId(raw.to_owned()))
        }
    }

    /// Registry bucket for this id: byte sum of tag and suffix, modulo
    /// `bucket_count`.
    ///
    /// `bucket_count` must be non-zero; the registry guarantees it.
    #[must_use]
    pub fn bucket(&self, bucket_count: usize) -> usize {
        let sum: u64 = self.0.bytes().map(u64::from).sum();
        let count = u64::try_from(bucket_count).unwrap_or(u64::MAX);
        // The remainder is below `bucket_count`, so it always fits.
        usize::try_from(sum % count).unwrap_or_default()
    }

    /// Borrow the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compute the bucket for untrusted id text.
///
/// # Errors
///
/// Returns `AppError::InvalidSessionId` for text that is not a session id.
pub fn bucket_for(raw: &str, bucket_count: usize) -> Result<usize> {
    Ok(SessionId::parse(raw)?.bucket(bucket_count))
}

/// One entry of a `CONNECTION_LIST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session id.
    pub id: SessionId,
    /// Agent address.
    #[serde(rename = "ip")]
    pub address: String,
    /// Accept time.
    pub connected_at: DateTime<Utc>,
}

/// Live state of one connected agent.
///
/// The TCP stream itself is owned by the session's worker task; the
/// session keeps the handles needed to stop and join that task.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    address: String,
    connected_at: DateTime<Utc>,
    queue: Arc<CommandQueue>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session with an empty command queue.
    #[must_use]
    pub fn new(
        id: SessionId,
        address: impl Into<String>,
        queue: CommandQueue,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            connected_at: Utc::now(),
            queue: Arc::new(queue),
            cancel,
            worker: Mutex::new(None),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Agent address (IP text).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Accept timestamp.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Pending commands for this agent.
    #[must_use]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Token that stops this session's worker.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the session has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the worker task so shutdown can join it.
    pub fn attach_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Take the worker handle, leaving `None` behind.
    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// List entry for this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            address: self.address.clone(),
            connected_at: self.connected_at,
        }
    }

    /// Release the session: stop the worker and discard queued commands.
    ///
    /// Returns the number of commands that were still pending.
    pub fn close(&self) -> usize {
        self.cancel.cancel();
        self.queue.clear()
    }
}
