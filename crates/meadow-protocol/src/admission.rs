//! Wait queue and the leader's admission hook.
//!
//! A node that withholds ACKs, or that waits on a leader, remembers the
//! competitors it saw in a [`WaitQueue`]. When a node leads a meadow it asks
//! its [`AdmissionStrategy`] which waiters to admit; admitted waiters get a
//! START. The handoff after admission (use duration, FREE, capacity
//! restitution) is left to strategies.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pool::ResourcePool;
use crate::types::{NodeClass, NodeId, SlotIndex, Timestamp};

/// Which waiter leaves the queue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOrder {
    /// Smallest `(timestamp, node)` first.
    #[default]
    Oldest,
    /// Largest `(timestamp, node)` first.
    Newest,
}

/// A recorded competitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Waiter {
    pub timestamp: Timestamp,
    pub node: NodeId,
}

impl Waiter {
    pub const fn new(timestamp: Timestamp, node: NodeId) -> Self {
        Self { timestamp, node }
    }
}

/// Ordered set of `(timestamp, node)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitQueue {
    entries: BTreeSet<Waiter>,
    order: WaitOrder,
}

impl WaitQueue {
    pub fn new(order: WaitOrder) -> Self {
        Self {
            entries: BTreeSet::new(),
            order,
        }
    }

    pub fn order(&self) -> WaitOrder {
        self.order
    }

    /// Record a waiter. Returns false if the exact pair was already queued.
    pub fn push(&mut self, waiter: Waiter) -> bool {
        self.entries.insert(waiter)
    }

    /// Next waiter in admission order.
    pub fn peek(&self) -> Option<&Waiter> {
        match self.order {
            WaitOrder::Oldest => self.entries.first(),
            WaitOrder::Newest => self.entries.last(),
        }
    }

    /// Remove and return the next waiter.
    pub fn pop(&mut self) -> Option<Waiter> {
        match self.order {
            WaitOrder::Oldest => self.entries.pop_first(),
            WaitOrder::Newest => self.entries.pop_last(),
        }
    }

    /// Remove every entry of `node`. Returns how many were removed.
    pub fn remove_node(&mut self, node: NodeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|w| w.node != node);
        before - self.entries.len()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.entries.iter().any(|w| w.node == node)
    }

    /// Waiters in admission order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Waiter> + '_> {
        match self.order {
            WaitOrder::Oldest => Box::new(self.entries.iter()),
            WaitOrder::Newest => Box::new(self.entries.iter().rev()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Everything a leader knows when choosing whom to admit.
pub struct AdmissionContext<'a> {
    /// The meadow being led.
    pub slot: SlotIndex,
    /// The leader itself.
    pub leader: NodeId,
    /// Local view of the meadows; the leader may debit or restore capacity.
    pub pool: &'a mut ResourcePool,
    /// Competitors recorded for this meadow.
    pub waiters: &'a WaitQueue,
    /// Classes learned during discovery, indexed by node id.
    pub classes: &'a [Option<NodeClass>],
}

impl AdmissionContext<'_> {
    /// Class of a node, if discovered.
    pub fn class_of(&self, node: NodeId) -> Option<NodeClass> {
        self.classes.get(node as usize).copied().flatten()
    }
}

/// A leader's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Keep every waiter queued.
    Hold,
    /// Send START to these waiters and drop them from the queue.
    Start(Vec<NodeId>),
}

/// Extension point invoked whenever a leader must choose the next waiters:
/// on entering DECIDE, and each time a new competitor is recorded while
/// leading.
pub trait AdmissionStrategy: Send {
    fn admit(&mut self, ctx: AdmissionContext<'_>) -> Admission;
}

/// Admits nobody. The leader keeps its meadow and its waiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldAdmission;

impl AdmissionStrategy for HoldAdmission {
    fn admit(&mut self, _ctx: AdmissionContext<'_>) -> Admission {
        Admission::Hold
    }
}
