//! Lamport logical clock shared by a node's send and receive paths.
//!
//! Both paths hold the same clock: the state machine ticks it when it
//! composes an outgoing message, the receiver folds in every incoming
//! timestamp before the message reaches the inbound queue. Every update is
//! a read-modify-write under one lock, so the two paths are linearizable
//! with respect to each other.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::{Message, MessageKind};
use crate::types::{NodeId, Timestamp};

/// Largest timestamp the wire record can carry.
pub const MAX_TIMESTAMP: Timestamp = i32::MAX as Timestamp;

/// Monotonic Lamport clock.
///
/// Values never exceed [`MAX_TIMESTAMP`]. Once there, the clock stops
/// advancing.
#[derive(Debug, Default)]
pub struct LogicalClock {
    ts: Mutex<Timestamp>,
}

impl LogicalClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `ts`, capped at [`MAX_TIMESTAMP`].
    pub fn starting_at(ts: Timestamp) -> Self {
        Self {
            ts: Mutex::new(ts.min(MAX_TIMESTAMP)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timestamp> {
        // The guarded value is a plain integer, a panic mid-update cannot tear it.
        self.ts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value, without advancing.
    pub fn now(&self) -> Timestamp {
        *self.lock()
    }

    /// Increment and return the new value.
    /// Must be called before sending a message.
    pub fn tick(&self) -> Timestamp {
        let mut ts = self.lock();
        *ts = advance(*ts);
        *ts
    }

    /// Fold in a remote timestamp: `ts = max(ts, remote) + 1`.
    /// Must be called whenever a message is received.
    pub fn observe(&self, remote: Timestamp) -> Timestamp {
        let mut ts = self.lock();
        *ts = advance((*ts).max(remote));
        *ts
    }

    /// Tick and compose an outgoing message in one critical section.
    ///
    /// No other send or receive can interleave between allocating the
    /// timestamp and building the message that carries it.
    pub fn stamp(&self, kind: MessageKind, sender: NodeId, value: i32) -> Message {
        let mut ts = self.lock();
        *ts = advance(*ts);
        Message::new(kind, *ts, sender, value)
    }
}

fn advance(ts: Timestamp) -> Timestamp {
    ts.saturating_add(1).min(MAX_TIMESTAMP)
}
