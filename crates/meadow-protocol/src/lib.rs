//! Meadow Protocol - Class-Prioritised Mutual Exclusion over Shared Meadows
//!
//! Every node of a fixed cluster runs the same protocol: discover the other
//! nodes, then repeatedly decide whether to request one of a fixed set of
//! capacity-limited meadows, arbitrate conflicting requests with Lamport
//! timestamps and a two-class priority rule, and lead the meadow once every
//! other node has consented.
//!
//! # Overview
//!
//! - [`LogicalClock`]: Lamport clock shared by the send and receive paths
//! - [`Message`] / [`wire`]: the `{timestamp, sender_id, value}` record and
//!   its kind tag
//! - [`ResourcePool`]: meadows with an occupancy flag and remaining capacity
//! - [`priority`]: the pure conflict rule (HARE: Lamport order, BEAR:
//!   never yields)
//! - [`NodeStateMachine`]: INIT → THINK → IDLE/WANT → DECIDE/WAIT → PARTY
//! - [`admission`]: the leader's wait queue and admission hook
//!
//! The state machine is synchronous and performs no I/O: the runtime in
//! `meadow-node` takes messages from the inbound queue, hands them to
//! [`NodeStateMachine::handle`] and executes the returned [`Action`]s.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use meadow_protocol::{
//!     Action, LogicalClock, MessageKind, NodeClass, NodeState, NodeStateMachine, ProtocolConfig,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let clock = Arc::new(LogicalClock::new());
//! let mut node = NodeStateMachine::new(
//!     0,
//!     2,
//!     NodeClass::Hare,
//!     ProtocolConfig::default(),
//!     clock,
//!     StdRng::seed_from_u64(1),
//! )?;
//!
//! let actions = node.start()?;
//! assert!(matches!(
//!     actions[0],
//!     Action::Broadcast { message } if message.kind == MessageKind::Type
//! ));
//! assert_eq!(node.state(), NodeState::Init);
//! # Ok::<(), meadow_protocol::Error>(())
//! ```

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod machine;
pub mod message;
pub mod pool;
pub mod priority;
pub mod types;
pub mod wire;

pub use admission::{
    Admission, AdmissionContext, AdmissionStrategy, HoldAdmission, WaitOrder, WaitQueue, Waiter,
};
pub use clock::{LogicalClock, MAX_TIMESTAMP};
pub use config::{Demands, IdleUnits, ProtocolConfig};
pub use error::{Error, Result};
pub use machine::{Action, NodeStateMachine};
pub use message::{Message, MessageKind};
pub use pool::{ResourcePool, ResourceSlot};
pub use priority::{resolve, Request, Resolution};
pub use types::{NodeClass, NodeId, NodeState, SlotIndex, Timestamp};
pub use wire::{Frame, WireRecord};
