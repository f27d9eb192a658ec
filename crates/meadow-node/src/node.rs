//! Node runner: one state-machine task and one receiver task per node.

use std::any::Any;
use std::sync::Arc;

use meadow_protocol::{
    Action, AdmissionStrategy, LogicalClock, Message, NodeClass, NodeId, NodeState,
    NodeStateMachine,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::audit::{AuditEntry, AuditSink, CsvAudit, NullAudit};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::queue::InboundQueue;
use crate::receiver::ReceiverLoop;
use crate::transport::Transport;

/// A configured node, ready to spawn.
pub struct Node<T: Transport> {
    id: NodeId,
    machine: NodeStateMachine,
    transport: Arc<T>,
    clock: Arc<LogicalClock>,
    queue: Arc<InboundQueue>,
    audit: Box<dyn AuditSink>,
}

impl<T: Transport> Node<T> {
    /// Build a node from its config and its endpoint on the network.
    ///
    /// Draws the class (unless configured) from the node's own rng and
    /// opens a CSV audit trail when `audit_dir` is set.
    pub fn new(config: NodeConfig, transport: T) -> Result<Self> {
        if transport.local_id() != config.id || transport.cluster_size() != config.cluster_size {
            return Err(Error::Config(format!(
                "transport is node {} of {}, config is node {} of {}",
                transport.local_id(),
                transport.cluster_size(),
                config.id,
                config.cluster_size
            )));
        }

        let mut rng = config.rng();
        let class = config.resolve_class(&mut rng);
        let clock = Arc::new(LogicalClock::new());
        let machine = NodeStateMachine::new(
            config.id,
            config.cluster_size,
            class,
            config.protocol.clone(),
            Arc::clone(&clock),
            rng,
        )?;

        let audit: Box<dyn AuditSink> = match &config.audit_dir {
            Some(dir) => Box::new(CsvAudit::create(dir, config.id)?),
            None => Box::new(NullAudit),
        };

        Ok(Self {
            id: config.id,
            machine,
            transport: Arc::new(transport),
            clock,
            queue: Arc::new(InboundQueue::new()),
            audit,
        })
    }

    /// Replace the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Box::new(audit);
        self
    }

    /// Replace the leader's admission strategy.
    #[must_use]
    pub fn with_admission(mut self, admission: Box<dyn AdmissionStrategy>) -> Self {
        self.machine = self.machine.with_admission(admission);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn class(&self) -> NodeClass {
        self.machine.class()
    }

    /// Start both tasks on the current tokio runtime.
    pub fn spawn(self) -> NodeHandle {
        let (state_tx, state_rx) = watch::channel(NodeState::Init);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let receiver = ReceiverLoop::new(
            Arc::clone(&self.transport),
            self.clock,
            Arc::clone(&self.queue),
            state_rx.clone(),
        );
        let receiver_task = tokio::spawn(receiver.run());

        let endpoint: Arc<dyn Any + Send + Sync> = self.transport.clone();
        let runner = Runner {
            id: self.id,
            machine: self.machine,
            transport: self.transport,
            queue: self.queue,
            audit: self.audit,
            state: state_tx,
            idle_deadline: None,
        };
        let machine_task = tokio::spawn(runner.run(shutdown_rx));

        NodeHandle {
            id: self.id,
            state: state_rx,
            shutdown: Some(shutdown_tx),
            machine_task: Some(machine_task),
            receiver_task,
            endpoint,
        }
    }
}

enum Event {
    Message(Message),
    IdleElapsed,
    Shutdown,
}

/// Owns the state machine and executes its actions.
struct Runner<T: Transport> {
    id: NodeId,
    machine: NodeStateMachine,
    transport: Arc<T>,
    queue: Arc<InboundQueue>,
    audit: Box<dyn AuditSink>,
    state: watch::Sender<NodeState>,
    idle_deadline: Option<Instant>,
}

impl<T: Transport> Runner<T> {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        info!(node = self.id, class = %self.machine.class(), "node started");
        self.record(NodeState::Init)?;

        let actions = self.machine.start()?;
        self.apply(actions).await?;

        while !self.machine.state().is_terminal() {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => Event::Shutdown,
                event = next_event(&self.queue, self.idle_deadline) => event,
            };

            let actions = match event {
                Event::Message(message) => self.machine.handle(message)?,
                Event::IdleElapsed => self.machine.on_idle_elapsed()?,
                Event::Shutdown => self.machine.finish()?,
            };
            self.apply(actions).await?;
        }

        info!(node = self.id, "node finished");
        Ok(())
    }

    async fn apply(&mut self, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    debug!(
                        node = self.id,
                        to,
                        kind = %message.kind,
                        ts = message.timestamp,
                        "send"
                    );
                    if let Err(e) = self.transport.send(to, message).await {
                        error!(node = self.id, to, error = %e, "send failed");
                        return Err(e);
                    }
                }
                Action::Broadcast { message } => {
                    debug!(
                        node = self.id,
                        kind = %message.kind,
                        ts = message.timestamp,
                        "broadcast"
                    );
                    if let Err(e) = self.transport.broadcast(message).await {
                        error!(node = self.id, error = %e, "broadcast failed");
                        return Err(e);
                    }
                }
                Action::Transition { from, to } => {
                    self.record(to)?;
                    self.state.send_replace(to);
                    if to == NodeState::Idle {
                        self.idle_deadline = self.machine.idle_window().map(|w| Instant::now() + w);
                    } else if from == NodeState::Idle {
                        self.idle_deadline = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, state: NodeState) -> Result<()> {
        self.audit.record(AuditEntry::now(self.id, state))
    }
}

/// Next inbound message, or the end of the IDLE window if one is running.
async fn next_event(queue: &InboundQueue, idle_deadline: Option<Instant>) -> Event {
    match idle_deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, queue.take()).await {
            Ok(message) => Event::Message(message),
            Err(_) => Event::IdleElapsed,
        },
        None => Event::Message(queue.take().await),
    }
}

/// Handle to a running node.
pub struct NodeHandle {
    id: NodeId,
    state: watch::Receiver<NodeState>,
    shutdown: Option<oneshot::Sender<()>>,
    machine_task: Option<JoinHandle<Result<()>>>,
    receiver_task: JoinHandle<Result<()>>,
    /// Held until shutdown so the inbox outlives both tasks.
    endpoint: Arc<dyn Any + Send + Sync>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Last published state.
    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.state.clone()
    }

    /// Check if either task has stopped.
    pub fn is_finished(&self) -> bool {
        self.machine_task
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
            || self.receiver_task.is_finished()
    }

    /// Drive the node into FINISH and wait for the state-machine task.
    ///
    /// The node's transport endpoint stays open until
    /// [`shutdown`](Self::shutdown), so peers that are still running can
    /// keep sending to it. Nothing that arrives after FINISH is handled.
    pub async fn finish(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.machine_task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }

    /// Finish the node and join both tasks.
    ///
    /// The receiver is aborted if it is still parked in a receive. Returns
    /// the first error either task ended with.
    pub async fn shutdown(mut self) -> Result<()> {
        let machine = self.finish().await;

        self.receiver_task.abort();
        let receiver = match self.receiver_task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e.into()),
        };

        drop(self.endpoint);
        debug!(node = self.id, "node joined");
        machine.and(receiver)
    }

    /// Stop both tasks without going through FINISH.
    pub fn abort(&self) {
        if let Some(task) = &self.machine_task {
            task.abort();
        }
        self.receiver_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAudit;
    use crate::config::ClusterConfig;
    use crate::transport::LocalNetwork;
    use meadow_protocol::MessageKind;
    use std::time::Duration;

    async fn wait_until(handle: &NodeHandle, wanted: impl Fn(NodeState) -> bool) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !wanted(*rx.borrow_and_update()) {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state not reached");
    }

    fn cluster(nodes: usize) -> ClusterConfig {
        ClusterConfig::default()
            .with_nodes(nodes)
            .with_seed(11)
            .with_idle_unit(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_single_node_reaches_decide() {
        let config = cluster(1).node(0).unwrap();
        let transport = LocalNetwork::new(1).pop().unwrap();
        let audit = MemoryAudit::new();

        let handle = Node::new(config, transport)
            .unwrap()
            .with_audit(audit.clone())
            .spawn();
        wait_until(&handle, |s| s == NodeState::Decide).await;
        handle.shutdown().await.unwrap();

        let states = audit.states();
        assert_eq!(&states[..2], &[NodeState::Init, NodeState::Think]);
        assert_eq!(states.last(), Some(&NodeState::Finish));
        assert!(states.contains(&NodeState::Want));
    }

    #[tokio::test]
    async fn test_shutdown_during_init() {
        // Node 1 never starts, so node 0 stays in INIT.
        let mut transports = LocalNetwork::new(2);
        let _silent = transports.pop().unwrap();
        let config = cluster(2).node(0).unwrap();
        let audit = MemoryAudit::new();

        let handle = Node::new(config, transports.pop().unwrap())
            .unwrap()
            .with_audit(audit.clone())
            .spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), NodeState::Init);

        handle.shutdown().await.unwrap();
        assert_eq!(audit.states(), vec![NodeState::Init, NodeState::Finish]);
    }

    #[tokio::test]
    async fn test_finished_node_still_accepts_sends() {
        let mut transports = LocalNetwork::new(2);
        let peer = transports.pop().unwrap();
        let config = cluster(2).node(0).unwrap();

        let mut handle = Node::new(config, transports.pop().unwrap())
            .unwrap()
            .spawn();
        peer.send(0, Message::new(MessageKind::Type, 1, 1, 0))
            .await
            .unwrap();
        wait_until(&handle, |s| s != NodeState::Init).await;

        handle.finish().await.unwrap();
        assert_eq!(handle.state(), NodeState::Finish);

        // The first send releases the receiver; later ones must still land.
        for ts in 10..13 {
            peer.send(0, Message::new(MessageKind::Want, ts, 1, 2))
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_transport() {
        let config = cluster(3).node(1).unwrap();
        let transport = LocalNetwork::new(3).remove(0);
        assert!(matches!(Node::new(config, transport), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_configured_class() {
        let config = cluster(2)
            .with_classes(vec![NodeClass::Bear])
            .node(0)
            .unwrap();
        let node = Node::new(config, LocalNetwork::new(2).remove(0)).unwrap();
        assert_eq!(node.id(), 0);
        assert_eq!(node.class(), NodeClass::Bear);
    }
}
