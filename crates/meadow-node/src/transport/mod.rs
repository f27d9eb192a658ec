//! Transport primitives consumed by a node.
//!
//! The protocol assumes reliable, ordered, exactly-once delivery between
//! any two nodes. A transport only moves stamped messages: it never touches
//! the clock and never interprets kinds or payloads.

use std::future::Future;

use meadow_protocol::{Message, NodeId};

use crate::error::Result;

pub mod local;

pub use local::{LocalNetwork, LocalTransport};

/// Point-to-point, broadcast and receive-any over a fixed cluster.
pub trait Transport: Send + Sync + 'static {
    /// This node's id.
    fn local_id(&self) -> NodeId;

    /// Number of nodes in the cluster, including this one.
    fn cluster_size(&self) -> usize;

    /// Send to one node.
    fn send(&self, to: NodeId, message: Message) -> impl Future<Output = Result<()>> + Send;

    /// Send to every node except this one.
    fn broadcast(&self, message: Message) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next message from any node.
    fn recv(&self) -> impl Future<Output = Result<Message>> + Send;
}
