//! Session registry: live sessions bucketed by session-id hash.
//!
//! Buckets are plain `Vec` chains inside one registry-wide mutex. The
//! bucket count is fixed at construction and is the only value ever
//! passed to [`SessionId::bucket`], so placement and lookup always agree.
//!
//! Removing a session is the only way a session is retired: the registry
//! cancels the session's token and drains its queue before handing the
//! last shared handle back to the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::models::session::{Session, SessionId, SessionSummary};
use crate::{AppError, Result};

type Buckets = Vec<Vec<Arc<Session>>>;

/// Concurrency-safe directory of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    bucket_count: usize,
    buckets: Mutex<Buckets>,
}

impl SessionRegistry {
    /// Create an empty registry with `bucket_count` buckets.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` when `bucket_count` is zero.
    pub fn new(bucket_count: usize) -> Result<Self> {
        if bucket_count == 0 {
            return Err(AppError::Registry(
                "bucket count must be greater than zero".into(),
            ));
        }
        Ok(Self {
            bucket_count,
            buckets: Mutex::new(vec![Vec::new(); bucket_count]),
        })
    }

    /// Number of buckets this registry was built with.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Insert a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if a live session already has this id.
    pub fn put(&self, session: Arc<Session>) -> Result<()> {
        let bucket = session.id().bucket(self.bucket_count);
        let mut buckets = self.lock();
        let chain = &mut buckets[bucket];
        if chain.iter().any(|s| s.id() == session.id()) {
            return Err(AppError::Registry(format!(
                "session {} is already registered",
                session.id()
            )));
        }
        debug!(session_id = %session.id(), bucket, "session registered");
        chain.push(session);
        Ok(())
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let bucket = id.bucket(self.bucket_count);
        self.lock()[bucket]
            .iter()
            .find(|s| s.id() == id)
            .map(Arc::clone)
    }

    /// Look up a live session by untrusted id text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSessionId` if `raw` is not a session id.
    pub fn get_str(&self, raw: &str) -> Result<Option<Arc<Session>>> {
        let id = SessionId::parse(raw)?;
        Ok(self.get(&id))
    }

    /// Remove and release a session.
    ///
    /// Returns `None` if no live session has this id (already removed, or
    /// never registered).
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let bucket = id.bucket(self.bucket_count);
        let removed = {
            let mut buckets = self.lock();
            let chain = &mut buckets[bucket];
            let pos = chain.iter().position(|s| s.id() == id)?;
            chain.remove(pos)
        };
        let dropped = removed.close();
        info!(session_id = %id, dropped_commands = dropped, "session removed");
        Some(removed)
    }

    /// Remove and release a session by untrusted id text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSessionId` if `raw` is not a session id.
    pub fn remove_str(&self, raw: &str) -> Result<Option<Arc<Session>>> {
        let id = SessionId::parse(raw)?;
        Ok(self.remove(&id))
    }

    /// Id and address of every live session, by bucket then chain order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        self.lock()
            .iter()
            .flatten()
            .map(|s| s.summary())
            .collect()
    }

    /// Remove and release every session. Used at shutdown.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let drained: Vec<Arc<Session>> = {
            let mut buckets = self.lock();
            buckets.iter_mut().flat_map(std::mem::take).collect()
        };
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "registry drained");
        }
        drained
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().iter().all(Vec::is_empty)
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
