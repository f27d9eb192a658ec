//! Timestamp-ordered inbound queue.
//!
//! The receiver loop pushes, the state machine takes. `take` always returns
//! the buffered message with the smallest timestamp, ties broken by arrival
//! order. A message with a small timestamp that arrives late is still
//! served before earlier arrivals with larger timestamps.
//!
//! Wakeups use [`Notify`]: `notify_one` stores a permit when nobody is
//! waiting, so a push that lands between a consumer's empty check and its
//! `notified().await` is not lost.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use meadow_protocol::{Message, Timestamp};
use tokio::sync::Notify;

/// Heap entry ordered by `(timestamp, arrival)`.
#[derive(Debug)]
struct Pending {
    timestamp: Timestamp,
    arrival: u64,
    message: Message,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Pending {
    fn key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.arrival)
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Pending>>,
    arrivals: u64,
}

/// Concurrency-safe min-timestamp inbox.
#[derive(Debug, Default)]
pub struct InboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a message and wake the consumer.
    pub fn push(&self, message: Message) {
        {
            let mut inner = self.lock();
            let arrival = inner.arrivals;
            inner.arrivals += 1;
            inner.heap.push(Reverse(Pending {
                timestamp: message.timestamp,
                arrival,
                message,
            }));
        }
        self.notify.notify_one();
    }

    /// Remove the minimum-timestamp message, if any, without waiting.
    pub fn try_take(&self) -> Option<Message> {
        self.lock().heap.pop().map(|Reverse(p)| p.message)
    }

    /// Wait until a message is buffered, then remove the minimum.
    pub async fn take(&self) -> Message {
        loop {
            if let Some(message) = self.try_take() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    /// Like [`take`](Self::take), giving up after `timeout`.
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn take_timeout(&self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.take()).await.ok()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}
