//! Conflict resolution between two requests for the same meadow.
//!
//! A node with a pending request that receives a competing WANT for the
//! same slot either answers at once ([`Resolution::Concede`]) or withholds
//! its ACK and queues the competitor ([`Resolution::Defer`]). The rule is a
//! pure function keyed by the local node's class:
//!
//! - **HARE**: Lamport order. The request with the smaller
//!   `(timestamp, sender_id)` keeps the slot, so a HARE defers exactly
//!   those competitors whose request comes after its own.
//! - **BEAR**: absolute. A BEAR never answers a same-slot WANT while its
//!   own request is pending.
//!
//! Requests for different slots never reach this rule; they are ACKed
//! immediately.

use crate::types::{NodeClass, NodeId, Timestamp};

/// A request identified by its Lamport stamp and origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Request {
    pub timestamp: Timestamp,
    pub sender: NodeId,
}

impl Request {
    pub const fn new(timestamp: Timestamp, sender: NodeId) -> Self {
        Self { timestamp, sender }
    }

    /// Whether `self` was issued strictly after `other` in the total
    /// order `(timestamp, sender_id)`.
    pub fn is_later_than(&self, other: &Request) -> bool {
        self > other
    }
}

/// Outcome of a same-slot conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Withhold the ACK and remember the competitor.
    Defer,
    /// ACK the competitor now.
    Concede,
}

/// Resolve a same-slot conflict from the local node's point of view.
pub fn resolve(class: NodeClass, local: Request, incoming: Request) -> Resolution {
    match class {
        NodeClass::Hare if incoming.is_later_than(&local) => Resolution::Defer,
        NodeClass::Hare => Resolution::Concede,
        NodeClass::Bear => Resolution::Defer,
    }
}
