//! The receiver loop: network → clock → inbound queue.

use std::sync::Arc;

use meadow_protocol::{LogicalClock, NodeState};
use tokio::sync::watch;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::queue::InboundQueue;
use crate::transport::Transport;

/// Pump that drains the transport into the inbound queue.
///
/// Each iteration does one blocking receive, folds the message's timestamp
/// into the clock, then pushes it. It never looks at kinds or payloads. The
/// loop checks for FINISH between receives only; a loop parked inside a
/// receive must be aborted from outside.
pub struct ReceiverLoop<T: Transport> {
    transport: Arc<T>,
    clock: Arc<LogicalClock>,
    queue: Arc<InboundQueue>,
    state: watch::Receiver<NodeState>,
}

impl<T: Transport> ReceiverLoop<T> {
    pub fn new(
        transport: Arc<T>,
        clock: Arc<LogicalClock>,
        queue: Arc<InboundQueue>,
        state: watch::Receiver<NodeState>,
    ) -> Self {
        Self {
            transport,
            clock,
            queue,
            state,
        }
    }

    /// Run until the node reaches FINISH.
    ///
    /// A transport failure ends the loop with the error; there is no
    /// recovery path.
    pub async fn run(self) -> Result<()> {
        let node = self.transport.local_id();
        debug!(node, "receiver loop started");

        while !self.state.borrow().is_terminal() {
            let message = match self.transport.recv().await {
                Ok(message) => message,
                Err(e) => {
                    error!(node, error = %e, "receive failed");
                    return Err(e);
                }
            };
            let now = self.clock.observe(message.timestamp);
            trace!(node, %message, clock = now, "received");
            self.queue.push(message);
        }

        debug!(node, "receiver loop stopped");
        Ok(())
    }
}
