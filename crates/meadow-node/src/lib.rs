//! Meadow Node - Concurrent Runtime for the Meadow Protocol
//!
//! Runs a [`meadow_protocol::NodeStateMachine`] against a real transport.
//! Each node is two tokio tasks sharing a Lamport clock:
//!
//! - **Receiver loop**: blocks on the transport, folds each message's
//!   timestamp into the clock and pushes it into the inbound queue
//! - **State machine task**: takes the lowest-timestamp message from the
//!   queue, hands it to the state machine and executes the resulting sends,
//!   broadcasts and state transitions
//!
//! # Architecture
//!
//! - **Queue**: timestamp-ordered inbox with blocking and timed takes
//! - **Transport**: point-to-point, broadcast and receive-any; an in-process
//!   [`LocalNetwork`] ships with the crate
//! - **Audit**: one row per state transition (CSV, memory or nothing)
//! - **Config**: cluster-wide settings from JSON or the environment
//!
//! # Example
//!
//! ```no_run
//! use meadow_node::{ClusterConfig, LocalNetwork, Node};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meadow_node::Error> {
//!     let config = ClusterConfig::default().with_nodes(3).with_seed(7);
//!     let mut handles = Vec::new();
//!     for (node, transport) in config.node_configs()?.into_iter().zip(LocalNetwork::new(3)) {
//!         handles.push(Node::new(node, transport)?.spawn());
//!     }
//!     for handle in &mut handles {
//!         handle.finish().await?;
//!     }
//!     for handle in handles {
//!         handle.shutdown().await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod node;
pub mod queue;
pub mod receiver;
pub mod transport;

pub use audit::{AuditEntry, AuditSink, CsvAudit, MemoryAudit, NullAudit};
pub use config::{ClusterConfig, NodeConfig};
pub use error::{Error, Result};
pub use node::{Node, NodeHandle};
pub use queue::InboundQueue;
pub use receiver::ReceiverLoop;
pub use transport::{LocalNetwork, LocalTransport, Transport};
