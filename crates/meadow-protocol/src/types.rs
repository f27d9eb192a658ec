//! Core identifiers and enums shared across the protocol.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Node identifier, `0..N` within a fixed cluster.
pub type NodeId = u32;

/// Lamport timestamp.
pub type Timestamp = u32;

/// Index of a meadow in the resource pool.
pub type SlotIndex = usize;

/// The species a node belongs to, fixed for the node's lifetime.
///
/// The class decides how many capacity units the node takes from a meadow
/// and which priority rule it applies when two requests collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Class A: yields to earlier requests by Lamport order.
    Hare,
    /// Class B: never yields to a same-meadow competitor.
    Bear,
}

impl NodeClass {
    /// Value carried in the payload of a TYPE message.
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Hare => 0,
            Self::Bear => 1,
        }
    }

    /// Parse a TYPE payload.
    pub fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Hare),
            1 => Ok(Self::Bear),
            other => Err(Error::UnknownClass(other)),
        }
    }

    /// Fair coin flip between the two classes.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) {
            Self::Bear
        } else {
            Self::Hare
        }
    }
}

impl std::fmt::Display for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hare => write!(f, "HARE"),
            Self::Bear => write!(f, "BEAR"),
        }
    }
}

/// States of the per-node protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Discovering the classes of every node.
    Init,
    /// Deciding between idling and requesting a meadow.
    Think,
    /// Passively listening for a bounded window.
    Idle,
    /// Collecting ACKs for a meadow request.
    Want,
    /// Holding every ACK: leader of the requested meadow.
    Decide,
    /// Conceded leadership, waiting to be admitted.
    Wait,
    /// Using the meadow.
    Party,
    /// Terminal.
    Finish,
}

impl NodeState {
    /// Name written to the audit record.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Think => "THINK",
            Self::Idle => "IDLE",
            Self::Want => "WANT",
            Self::Decide => "DECIDE",
            Self::Wait => "WAIT",
            Self::Party => "PARTY",
            Self::Finish => "FINISH",
        }
    }

    /// Whether the state is terminal.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finish)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
