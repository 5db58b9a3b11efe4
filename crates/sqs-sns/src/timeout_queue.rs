//! Bounded-wait rendezvous queue used by the reply correlator.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Instant};

use crate::error::MessagingError;

/// A FIFO with a timed blocking pop.
///
/// Waiting is deadline-based: the deadline is computed once and re-armed on
/// every wakeup, so a spurious or stale notification never extends the wait.
/// `Notify` stores a permit when a push races a waiter that has not parked
/// yet, which closes the check-then-wait gap without holding the lock across
/// the wait.
pub struct TimeoutQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> TimeoutQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append an element and wake one waiter.
    pub async fn push(&self, item: T) {
        self.items.lock().await.push_back(item);
        self.notify.notify_one();
    }

    /// Non-blocking pop: the head element, or `None` if empty.
    pub async fn try_pop(&self) -> Option<T> {
        self.items.lock().await.pop_front()
    }

    /// Blocking pop. With `timeout = None`, waits until an element arrives;
    /// otherwise waits up to the given duration and returns
    /// [`MessagingError::Timeout`] on expiry with an empty queue.
    pub async fn pop(&self, timeout: Option<Duration>) -> Result<T, MessagingError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            // Arm the wakeup before checking the queue: a push between the
            // check and the wait leaves a stored permit instead of being lost.
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().await.pop_front() {
                return Ok(item);
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if time::timeout_at(deadline, notified).await.is_err() {
                        // Deadline hit; a push may still have raced the timer.
                        return self.items.lock().await.pop_front().ok_or(
                            MessagingError::Timeout(timeout.unwrap_or_default()),
                        );
                    }
                }
            }
        }
    }
}

impl<T> Default for TimeoutQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
