//! Error types for meadow-protocol.

use thiserror::Error;

use crate::types::{NodeId, SlotIndex};

/// Result type for meadow-protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the protocol core.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A wire frame carried a kind tag outside `0..=6`.
    #[error("unknown message kind: {0}")]
    UnknownKind(i32),

    /// A TYPE payload did not name a known node class.
    #[error("unknown node class: {0}")]
    UnknownClass(i32),

    /// A wire frame was shorter than a full record.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// A field that must be non-negative arrived negative.
    #[error("negative {field} on the wire: {value}")]
    Negative { field: &'static str, value: i32 },

    /// A field does not fit the signed 32-bit wire representation.
    #[error("{field} {value} does not fit the wire record")]
    Overflow { field: &'static str, value: u32 },

    /// A message named a node outside the cluster.
    #[error("node {node} is outside a cluster of {cluster_size}")]
    UnknownNode { node: NodeId, cluster_size: usize },

    /// No slot in the pool can take the requested demand.
    #[error("no eligible slot for demand {demand} among {slots} slots")]
    NoEligibleSlot { demand: u32, slots: usize },

    /// A slot index outside the pool.
    #[error("slot {slot} out of range (pool has {slots} slots)")]
    SlotOutOfRange { slot: SlotIndex, slots: usize },

    /// Occupying a slot would take its capacity below zero.
    #[error("slot {slot} cannot take demand {demand}: {remaining} remaining")]
    InsufficientCapacity {
        slot: SlotIndex,
        demand: u32,
        remaining: u32,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
