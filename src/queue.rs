//! FIFO command queue with a bounded-wait pop.
//!
//! Each queue owns its own lock and wake-up signal, so a push to one
//! session's queue never wakes the worker of another. The lock is a plain
//! [`std::sync::Mutex`] held only for the push/pop itself and never
//! across an `.await`.
//!
//! [`CommandQueue::pop`] gives up after the configured interval and
//! returns `None`, letting a polling loop observe cancellation between
//! attempts.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// Ordered queue of owned text items.
#[derive(Debug)]
pub struct CommandQueue {
    items: Mutex<VecDeque<String>>,
    ready: Notify,
    wait: Duration,
}

impl CommandQueue {
    /// Create an empty queue whose [`pop`](Self::pop) waits up to `wait`.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            wait,
        }
    }

    /// Append `item` and wake the consumer.
    pub fn push(&self, item: impl Into<String>) {
        let len = {
            let mut items = self.lock();
            items.push_back(item.into());
            items.len()
        };
        self.ready.notify_one();
        trace!(len, "queue push");
    }

    /// Remove the oldest item, waiting up to the configured interval.
    ///
    /// Returns `None` if nothing arrived in time. Cancel-safe: dropping
    /// the future before it completes never loses an item.
    pub async fn pop(&self) -> Option<String> {
        self.pop_timeout(self.wait).await
    }

    /// Remove the oldest item, waiting up to `wait`.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<String> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            // A push between `try_pop` and here leaves a stored permit,
            // so `notified` completes immediately and we re-check.
            if timeout_at(deadline, self.ready.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Remove the oldest item without waiting.
    pub fn try_pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard every queued item, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    /// Configured bounded-wait interval.
    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
