//! Per-node protocol state machine.
//!
//! The machine is synchronous and performs no I/O. The runner feeds it
//! messages taken from the inbound queue and executes the [`Action`]s it
//! returns. The only shared object it touches is the [`LogicalClock`], which
//! it ticks while composing outgoing messages.
//!
//! ```text
//!  INIT ──all TYPEs──▶ THINK ──coin──▶ IDLE ──window over──▶ THINK
//!                        │
//!                        └──coin──▶ WANT ──all ACKs──▶ DECIDE
//!                                     │
//!                                     └──COME──▶ WAIT ──START──▶ PARTY
//! ```
//!
//! THINK is purely local: entering it flips the coin and moves on within
//! the same call, so the machine only ever rests in a state that waits for
//! input.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, trace};

use crate::admission::{
    Admission, AdmissionContext, AdmissionStrategy, HoldAdmission, WaitQueue, Waiter,
};
use crate::clock::LogicalClock;
use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::message::{slot_payload, Message, MessageKind};
use crate::pool::ResourcePool;
use crate::priority::{resolve, Request, Resolution};
use crate::types::{NodeClass, NodeId, NodeState, SlotIndex, Timestamp};

/// Effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Point-to-point send.
    Send { to: NodeId, message: Message },
    /// Send to every other node.
    Broadcast { message: Message },
    /// The machine changed state; one per transition, for the audit record.
    Transition { from: NodeState, to: NodeState },
}

/// An outstanding WANT.
#[derive(Debug, Clone)]
struct PendingRequest {
    slot: SlotIndex,
    send_ts: Timestamp,
    acked: Vec<bool>,
    outstanding: usize,
}

impl PendingRequest {
    fn new(slot: SlotIndex, send_ts: Timestamp, cluster_size: usize) -> Self {
        Self {
            slot,
            send_ts,
            acked: vec![false; cluster_size],
            outstanding: cluster_size.saturating_sub(1),
        }
    }

    /// Record an ACK. Returns false for a repeated or foreign ACK.
    fn record_ack(&mut self, from: NodeId) -> bool {
        match self.acked.get_mut(from as usize) {
            Some(seen) if !*seen => {
                *seen = true;
                self.outstanding = self.outstanding.saturating_sub(1);
                true
            }
            _ => false,
        }
    }
}

/// The protocol core of one node.
pub struct NodeStateMachine {
    id: NodeId,
    cluster_size: usize,
    class: NodeClass,
    demand: u32,
    config: ProtocolConfig,
    clock: Arc<LogicalClock>,
    rng: StdRng,
    state: NodeState,

    /// Classes learned from TYPE messages, indexed by node id.
    classes: Vec<Option<NodeClass>>,
    discovered: Vec<bool>,
    undiscovered: usize,

    pool: ResourcePool,
    request: Option<PendingRequest>,
    leading: Option<SlotIndex>,
    waiting_for: Option<SlotIndex>,
    wait_queue: WaitQueue,
    idle_window: Option<Duration>,
    admission: Box<dyn AdmissionStrategy>,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("state", &self.state)
            .field("pending_slot", &self.pending_slot())
            .field("leading", &self.leading)
            .field("waiters", &self.wait_queue.len())
            .finish_non_exhaustive()
    }
}

impl NodeStateMachine {
    /// Create a machine in INIT.
    ///
    /// # Arguments
    ///
    /// * `id` - This node, `0..cluster_size`
    /// * `cluster_size` - Number of nodes N
    /// * `class` - This node's class, fixed for its lifetime
    /// * `config` - Protocol configuration shared by the cluster
    /// * `clock` - Clock shared with the receiver path
    /// * `rng` - Source for coin flips, idle windows and slot choice
    pub fn new(
        id: NodeId,
        cluster_size: usize,
        class: NodeClass,
        config: ProtocolConfig,
        clock: Arc<LogicalClock>,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        if id as usize >= cluster_size {
            return Err(Error::UnknownNode {
                node: id,
                cluster_size,
            });
        }

        Ok(Self {
            id,
            cluster_size,
            class,
            demand: config.demands.of(class),
            pool: ResourcePool::new(config.slots, config.slot_capacity),
            wait_queue: WaitQueue::new(config.wait_order),
            config,
            clock,
            rng,
            state: NodeState::Init,
            classes: vec![None; cluster_size],
            discovered: vec![false; cluster_size],
            undiscovered: cluster_size,
            request: None,
            leading: None,
            waiting_for: None,
            idle_window: None,
            admission: Box::new(HoldAdmission),
        })
    }

    /// Replace the admission strategy (default: [`HoldAdmission`]).
    #[must_use]
    pub fn with_admission(mut self, admission: Box<dyn AdmissionStrategy>) -> Self {
        self.admission = admission;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    /// Capacity units this node takes per acquisition.
    pub fn demand(&self) -> u32 {
        self.demand
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    /// Classes learned so far, indexed by node id.
    pub fn classes(&self) -> &[Option<NodeClass>] {
        &self.classes
    }

    /// Whether every node has been discovered.
    pub fn discovery_complete(&self) -> bool {
        self.undiscovered == 0
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }

    /// Slot of the outstanding WANT, if any.
    pub fn pending_slot(&self) -> Option<SlotIndex> {
        self.request.as_ref().map(|r| r.slot)
    }

    /// ACKs still missing for the outstanding WANT.
    pub fn outstanding_acks(&self) -> Option<usize> {
        self.request.as_ref().map(|r| r.outstanding)
    }

    /// Slot this node leads.
    pub fn leading(&self) -> Option<SlotIndex> {
        self.leading
    }

    /// Slot this node waits on (WAIT) or uses (PARTY).
    pub fn waiting_for(&self) -> Option<SlotIndex> {
        self.waiting_for
    }

    /// Length of the current IDLE window. `None` outside IDLE.
    pub fn idle_window(&self) -> Option<Duration> {
        self.idle_window
    }

    /// Enter INIT: announce our class and count ourselves as discovered.
    ///
    /// Call once, before any message is handled.
    pub fn start(&mut self) -> Result<Vec<Action>> {
        let mut out = Vec::new();
        let message = self
            .clock
            .stamp(MessageKind::Type, self.id, self.class.to_wire());
        out.push(Action::Broadcast { message });
        info!(node = self.id, class = %self.class, demand = self.demand, "announcing class");

        self.discover(self.id, self.class, &mut out)?;
        Ok(out)
    }

    /// Process one message taken from the inbound queue.
    pub fn handle(&mut self, msg: Message) -> Result<Vec<Action>> {
        let mut out = Vec::new();

        if msg.sender as usize >= self.cluster_size {
            debug!(node = self.id, %msg, "dropping message from unknown node");
            return Ok(out);
        }
        if msg.sender == self.id {
            trace!(node = self.id, %msg, "dropping own message");
            return Ok(out);
        }

        trace!(node = self.id, state = %self.state, %msg, "handling");

        match self.state {
            NodeState::Init => self.on_init(msg, &mut out)?,
            NodeState::Idle => self.on_idle(msg, &mut out),
            NodeState::Want => self.on_want(msg, &mut out)?,
            NodeState::Decide => self.on_decide(msg, &mut out),
            NodeState::Wait => self.on_wait(msg, &mut out)?,
            NodeState::Party => self.on_party(msg, &mut out),
            NodeState::Think | NodeState::Finish => self.on_passive(&msg),
        }

        Ok(out)
    }

    /// The IDLE window ran out without leaving IDLE.
    pub fn on_idle_elapsed(&mut self) -> Result<Vec<Action>> {
        let mut out = Vec::new();
        if self.state == NodeState::Idle {
            self.transition(NodeState::Think, &mut out)?;
        }
        Ok(out)
    }

    /// Enter FINISH. No further messages are processed.
    pub fn finish(&mut self) -> Result<Vec<Action>> {
        let mut out = Vec::new();
        if !self.state.is_terminal() {
            self.transition(NodeState::Finish, &mut out)?;
        }
        Ok(out)
    }

    fn transition(&mut self, to: NodeState, out: &mut Vec<Action>) -> Result<()> {
        let from = self.state;
        self.state = to;
        out.push(Action::Transition { from, to });
        debug!(node = self.id, %from, %to, "transition");

        if from == NodeState::Idle {
            self.idle_window = None;
        }

        match to {
            NodeState::Think => {
                let next = if self.rng.gen_bool(0.5) {
                    NodeState::Want
                } else {
                    NodeState::Idle
                };
                self.transition(next, out)
            }
            NodeState::Idle => {
                let units = self
                    .rng
                    .gen_range(self.config.idle_units.min..=self.config.idle_units.max);
                self.idle_window = Some(self.config.idle_unit() * units);
                Ok(())
            }
            NodeState::Want => {
                let slot = self.pool.choose(self.demand, &mut self.rng)?;
                self.request_slot(slot, out)
            }
            NodeState::Decide => {
                self.enter_decide(out);
                Ok(())
            }
            NodeState::Init | NodeState::Wait | NodeState::Party | NodeState::Finish => Ok(()),
        }
    }

    fn discover(&mut self, node: NodeId, class: NodeClass, out: &mut Vec<Action>) -> Result<()> {
        let idx = node as usize;
        if !self.discovered[idx] {
            self.classes[idx] = Some(class);
            self.discovered[idx] = true;
            self.undiscovered -= 1;
            debug!(
                node = self.id,
                peer = node,
                %class,
                remaining = self.undiscovered,
                "discovered"
            );
        } else if self.classes[idx] != Some(class) {
            // A node's class is fixed; keep the first announcement.
            debug!(node = self.id, peer = node, %class, "ignoring conflicting TYPE");
        }

        if self.undiscovered == 0 {
            info!(node = self.id, "discovery complete");
            self.transition(NodeState::Think, out)?;
        }
        Ok(())
    }

    /// Broadcast a WANT for `slot` and start collecting ACKs.
    fn request_slot(&mut self, slot: SlotIndex, out: &mut Vec<Action>) -> Result<()> {
        let message = self
            .clock
            .stamp(MessageKind::Want, self.id, slot_payload(slot));
        let request = PendingRequest::new(slot, message.timestamp, self.cluster_size);
        let done = request.outstanding == 0;
        debug!(node = self.id, slot, ts = message.timestamp, "requesting meadow");

        self.request = Some(request);
        self.waiting_for = None;
        out.push(Action::Broadcast { message });

        if done {
            self.transition(NodeState::Decide, out)?;
        }
        Ok(())
    }

    fn enter_decide(&mut self, out: &mut Vec<Action>) {
        let Some(request) = self.request.take() else {
            return;
        };
        let slot = request.slot;
        self.leading = Some(slot);

        let message = self
            .clock
            .stamp(MessageKind::Occupied, self.id, slot_payload(slot));
        out.push(Action::Broadcast { message });
        info!(node = self.id, slot, waiters = self.wait_queue.len(), "leading meadow");

        self.run_admission(out);
    }

    /// Ask the admission strategy which waiters to START.
    fn run_admission(&mut self, out: &mut Vec<Action>) {
        let Some(slot) = self.leading else {
            return;
        };

        let decision = self.admission.admit(AdmissionContext {
            slot,
            leader: self.id,
            pool: &mut self.pool,
            waiters: &self.wait_queue,
            classes: &self.classes,
        });

        if let Admission::Start(nodes) = decision {
            for node in nodes {
                if node == self.id || node as usize >= self.cluster_size {
                    debug!(node = self.id, admitted = node, "ignoring invalid admission");
                    continue;
                }
                self.wait_queue.remove_node(node);
                let message = self
                    .clock
                    .stamp(MessageKind::Start, self.id, slot_payload(slot));
                debug!(node = self.id, admitted = node, slot, "admitting waiter");
                out.push(Action::Send { to: node, message });
            }
        }
    }

    fn ack(&self, to: NodeId, out: &mut Vec<Action>) {
        let message = self.clock.stamp(MessageKind::Ack, self.id, 0);
        trace!(node = self.id, to, ts = message.timestamp, "ack");
        out.push(Action::Send { to, message });
    }

    /// Inputs a state does not interpret. Reserved for OCCUPIED/FREE/TYPE
    /// bookkeeping.
    fn on_passive(&self, msg: &Message) {
        trace!(node = self.id, state = %self.state, %msg, "ignoring");
    }

    fn on_init(&mut self, msg: Message, out: &mut Vec<Action>) -> Result<()> {
        match msg.kind {
            MessageKind::Type => match msg.class() {
                Ok(class) => self.discover(msg.sender, class, out)?,
                Err(e) => debug!(node = self.id, %msg, error = %e, "bad TYPE payload"),
            },
            MessageKind::Want => self.ack(msg.sender, out),
            _ => self.on_passive(&msg),
        }
        Ok(())
    }

    fn on_idle(&mut self, msg: Message, out: &mut Vec<Action>) {
        match msg.kind {
            MessageKind::Want => self.ack(msg.sender, out),
            _ => self.on_passive(&msg),
        }
    }

    fn on_want(&mut self, msg: Message, out: &mut Vec<Action>) -> Result<()> {
        let Some(request) = self.request.as_mut() else {
            self.on_passive(&msg);
            return Ok(());
        };

        match msg.kind {
            MessageKind::Ack => {
                if request.record_ack(msg.sender) {
                    debug!(
                        node = self.id,
                        from = msg.sender,
                        outstanding = request.outstanding,
                        "ack received"
                    );
                    if request.outstanding == 0 {
                        self.transition(NodeState::Decide, out)?;
                    }
                }
            }
            MessageKind::Want if msg.slot() == Some(request.slot) => {
                let local = Request::new(request.send_ts, self.id);
                let incoming = Request::new(msg.timestamp, msg.sender);
                match resolve(self.class, local, incoming) {
                    Resolution::Defer => {
                        self.wait_queue.push(Waiter::new(msg.timestamp, msg.sender));
                        debug!(
                            node = self.id,
                            from = msg.sender,
                            slot = request.slot,
                            local_ts = request.send_ts,
                            incoming_ts = msg.timestamp,
                            "deferring competitor"
                        );
                    }
                    Resolution::Concede => self.ack(msg.sender, out),
                }
            }
            MessageKind::Want => self.ack(msg.sender, out),
            MessageKind::Come => {
                let slot = msg.slot();
                debug!(node = self.id, from = msg.sender, ?slot, "summoned, abandoning request");
                self.request = None;
                self.waiting_for = slot;
                self.transition(NodeState::Wait, out)?;
            }
            _ => self.on_passive(&msg),
        }
        Ok(())
    }

    fn on_decide(&mut self, msg: Message, out: &mut Vec<Action>) {
        match msg.kind {
            MessageKind::Want if msg.slot().is_some() && msg.slot() == self.leading => {
                self.wait_queue.push(Waiter::new(msg.timestamp, msg.sender));
                self.run_admission(out);
            }
            MessageKind::Want => self.ack(msg.sender, out),
            _ => self.on_passive(&msg),
        }
    }

    fn on_wait(&mut self, msg: Message, out: &mut Vec<Action>) -> Result<()> {
        match msg.kind {
            MessageKind::Start => {
                debug!(node = self.id, from = msg.sender, "admitted");
                self.transition(NodeState::Party, out)?;
            }
            MessageKind::Want if msg.slot().is_some() && msg.slot() == self.waiting_for => {
                self.wait_queue.push(Waiter::new(msg.timestamp, msg.sender));
            }
            MessageKind::Want => self.ack(msg.sender, out),
            _ => self.on_passive(&msg),
        }
        Ok(())
    }

    fn on_party(&mut self, msg: Message, out: &mut Vec<Action>) {
        match msg.kind {
            MessageKind::Want if msg.slot() != self.waiting_for => self.ack(msg.sender, out),
            _ => self.on_passive(&msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::VecDeque;

    fn machine(id: NodeId, n: usize, class: NodeClass) -> NodeStateMachine {
        NodeStateMachine::new(
            id,
            n,
            class,
            ProtocolConfig::default(),
            Arc::new(LogicalClock::new()),
            StdRng::seed_from_u64(u64::from(id) + 100),
        )
        .unwrap()
    }

    /// A machine past discovery, resting in IDLE.
    fn discovered(id: NodeId, classes: &[NodeClass]) -> NodeStateMachine {
        let mut m = machine(id, classes.len(), classes[id as usize]);
        m.classes = classes.iter().copied().map(Some).collect();
        m.discovered = vec![true; classes.len()];
        m.undiscovered = 0;
        m.state = NodeState::Idle;
        m.idle_window = Some(Duration::from_secs(1));
        m
    }

    /// Put a machine into WANT for a chosen slot, with its clock at `ts - 1`.
    fn force_request(m: &mut NodeStateMachine, slot: SlotIndex, ts: Timestamp) -> Vec<Action> {
        m.clock = Arc::new(LogicalClock::starting_at(ts - 1));
        m.state = NodeState::Want;
        m.idle_window = None;
        let mut out = Vec::new();
        m.request_slot(slot, &mut out).unwrap();
        out
    }

    fn msg(kind: MessageKind, ts: Timestamp, from: NodeId, value: i32) -> Message {
        Message::new(kind, ts, from, value)
    }

    fn sends(actions: &[Action]) -> Vec<(NodeId, MessageKind)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send { to, message } => Some((*to, message.kind)),
                _ => None,
            })
            .collect()
    }

    fn transitions(actions: &[Action]) -> Vec<(NodeState, NodeState)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Routes actions between in-memory machines, observing timestamps the
    /// way the receiver loop does.
    struct Harness {
        nodes: Vec<NodeStateMachine>,
        inboxes: Vec<VecDeque<Message>>,
    }

    impl Harness {
        fn new(nodes: Vec<NodeStateMachine>) -> Self {
            let inboxes = nodes.iter().map(|_| VecDeque::new()).collect();
            Self { nodes, inboxes }
        }

        fn route(&mut self, from: NodeId, actions: Vec<Action>) {
            for action in actions {
                match action {
                    Action::Send { to, message } => self.inboxes[to as usize].push_back(message),
                    Action::Broadcast { message } => {
                        for (i, inbox) in self.inboxes.iter_mut().enumerate() {
                            if i != from as usize {
                                inbox.push_back(message);
                            }
                        }
                    }
                    Action::Transition { .. } => {}
                }
            }
        }

        /// Deliver queued messages until every inbox is empty.
        fn settle(&mut self) {
            loop {
                let Some(i) = self.inboxes.iter().position(|q| !q.is_empty()) else {
                    return;
                };
                while let Some(m) = self.inboxes[i].pop_front() {
                    self.nodes[i].clock().observe(m.timestamp);
                    let out = self.nodes[i].handle(m).unwrap();
                    self.route(i as NodeId, out);
                }
            }
        }
    }

    #[test]
    fn test_new_rejects_foreign_id() {
        let err = NodeStateMachine::new(
            3,
            3,
            NodeClass::Hare,
            ProtocolConfig::default(),
            Arc::new(LogicalClock::new()),
            StdRng::seed_from_u64(0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::UnknownNode {
                node: 3,
                cluster_size: 3
            }
        );
    }

    #[test]
    fn test_start_broadcasts_class() {
        let mut m = machine(1, 3, NodeClass::Bear);
        let out = m.start().unwrap();
        assert_eq!(
            out,
            vec![Action::Broadcast {
                message: msg(MessageKind::Type, 1, 1, NodeClass::Bear.to_wire())
            }]
        );
        assert_eq!(m.state(), NodeState::Init);
        assert_eq!(m.classes()[1], Some(NodeClass::Bear));
    }

    #[test]
    fn test_discovery_is_idempotent_and_order_free() {
        let mut m = machine(0, 4, NodeClass::Hare);
        m.start().unwrap();

        for (from, ts) in [(3, 2), (3, 5), (1, 1)] {
            let out = m
                .handle(msg(MessageKind::Type, ts, from, NodeClass::Hare.to_wire()))
                .unwrap();
            assert!(transitions(&out).is_empty());
        }
        assert_eq!(m.state(), NodeState::Init);
        assert!(!m.discovery_complete());

        let out = m
            .handle(msg(MessageKind::Type, 9, 2, NodeClass::Bear.to_wire()))
            .unwrap();
        assert!(m.discovery_complete());
        assert_eq!(transitions(&out)[0], (NodeState::Init, NodeState::Think));
        assert!(matches!(m.state(), NodeState::Idle | NodeState::Want));
        assert_eq!(
            m.classes(),
            &[
                Some(NodeClass::Hare),
                Some(NodeClass::Hare),
                Some(NodeClass::Bear),
                Some(NodeClass::Hare)
            ]
        );
    }

    #[test]
    fn test_conflicting_type_keeps_first_class() {
        let mut m = machine(0, 3, NodeClass::Hare);
        m.start().unwrap();
        m.handle(msg(MessageKind::Type, 2, 1, NodeClass::Bear.to_wire()))
            .unwrap();
        m.handle(msg(MessageKind::Type, 3, 1, NodeClass::Hare.to_wire()))
            .unwrap();

        assert_eq!(m.classes()[1], Some(NodeClass::Bear));
        assert!(!m.discovery_complete());
        assert_eq!(m.state(), NodeState::Init);
    }

    #[test]
    fn test_init_acks_want_unconditionally() {
        let mut m = machine(0, 3, NodeClass::Bear);
        m.start().unwrap();
        let out = m.handle(msg(MessageKind::Want, 4, 2, 3)).unwrap();
        assert_eq!(sends(&out), vec![(2, MessageKind::Ack)]);
        assert_eq!(m.state(), NodeState::Init);
    }

    #[test]
    fn test_init_ignores_other_kinds_and_bad_types() {
        let mut m = machine(0, 2, NodeClass::Hare);
        m.start().unwrap();
        assert!(m.handle(msg(MessageKind::Occupied, 4, 1, 3)).unwrap().is_empty());
        assert!(m.handle(msg(MessageKind::Type, 4, 1, 42)).unwrap().is_empty());
        assert_eq!(m.state(), NodeState::Init);
    }

    #[test]
    fn test_unknown_and_own_senders_dropped() {
        let mut m = discovered(0, &[NodeClass::Hare, NodeClass::Hare]);
        assert!(m.handle(msg(MessageKind::Want, 3, 7, 1)).unwrap().is_empty());
        assert!(m.handle(msg(MessageKind::Want, 3, 0, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_idle_window_within_bounds() {
        let mut m = machine(0, 1, NodeClass::Hare);
        m.start().unwrap();
        for _ in 0..50 {
            if m.state() == NodeState::Idle {
                let window = m.idle_window().unwrap();
                assert!(window >= Duration::from_secs(1));
                assert!(window <= Duration::from_secs(10));
                m.on_idle_elapsed().unwrap();
            } else {
                break;
            }
        }
    }

    #[test]
    fn test_idle_acks_want_and_returns_to_think() {
        let mut m = discovered(1, &[NodeClass::Hare, NodeClass::Hare]);
        let out = m.handle(msg(MessageKind::Want, 6, 0, 2)).unwrap();
        assert_eq!(sends(&out), vec![(0, MessageKind::Ack)]);
        assert_eq!(m.state(), NodeState::Idle);

        let out = m.handle(msg(MessageKind::Free, 7, 0, 2)).unwrap();
        assert!(out.is_empty());

        let out = m.on_idle_elapsed().unwrap();
        assert_eq!(transitions(&out)[0], (NodeState::Idle, NodeState::Think));
        assert!(matches!(m.state(), NodeState::Idle | NodeState::Want));
    }

    #[test]
    fn test_idle_elapsed_outside_idle_is_noop() {
        let mut m = discovered(0, &[NodeClass::Hare, NodeClass::Hare]);
        force_request(&mut m, 1, 5);
        assert!(m.on_idle_elapsed().unwrap().is_empty());
        assert_eq!(m.state(), NodeState::Want);
    }

    #[test]
    fn test_think_reaches_both_outcomes() {
        let mut idle = 0;
        let mut want = 0;
        for seed in 0..40 {
            let mut m = NodeStateMachine::new(
                0,
                2,
                NodeClass::Hare,
                ProtocolConfig::default(),
                Arc::new(LogicalClock::new()),
                StdRng::seed_from_u64(seed),
            )
            .unwrap();
            m.start().unwrap();
            m.handle(msg(MessageKind::Type, 3, 1, 0)).unwrap();
            match m.state() {
                NodeState::Idle => idle += 1,
                NodeState::Want => want += 1,
                other => panic!("unexpected state {other}"),
            }
        }
        assert!(idle > 0 && want > 0);
    }

    #[test]
    fn test_want_collects_acks_once_each() {
        let mut m = discovered(0, &[NodeClass::Hare; 3]);
        let out = force_request(&mut m, 4, 10);
        assert_eq!(
            out,
            vec![Action::Broadcast {
                message: msg(MessageKind::Want, 10, 0, 4)
            }]
        );
        assert_eq!(m.outstanding_acks(), Some(2));

        m.handle(msg(MessageKind::Ack, 12, 1, 0)).unwrap();
        m.handle(msg(MessageKind::Ack, 13, 1, 0)).unwrap();
        assert_eq!(m.outstanding_acks(), Some(1));
        assert_eq!(m.state(), NodeState::Want);

        let out = m.handle(msg(MessageKind::Ack, 14, 2, 0)).unwrap();
        assert_eq!(m.state(), NodeState::Decide);
        assert_eq!(m.leading(), Some(4));
        assert_eq!(m.pending_slot(), None);
        assert_eq!(transitions(&out), vec![(NodeState::Want, NodeState::Decide)]);
        assert!(out.iter().any(|a| matches!(
            a,
            Action::Broadcast { message }
                if message.kind == MessageKind::Occupied && message.value == 4
        )));
    }

    #[test]
    fn test_disjoint_slot_want_is_acked() {
        let mut m = discovered(0, &[NodeClass::Bear, NodeClass::Hare]);
        force_request(&mut m, 1, 5);
        let out = m.handle(msg(MessageKind::Want, 2, 1, 2)).unwrap();
        assert_eq!(sends(&out), vec![(1, MessageKind::Ack)]);
        assert!(m.wait_queue().is_empty());
        assert_eq!(m.state(), NodeState::Want);
    }

    #[test]
    fn test_bear_never_acks_same_slot_competitor() {
        let mut m = discovered(1, &[NodeClass::Hare, NodeClass::Bear]);
        force_request(&mut m, 3, 20);
        // Earlier timestamp than ours, still no ACK.
        let out = m.handle(msg(MessageKind::Want, 4, 0, 3)).unwrap();
        assert!(sends(&out).is_empty());
        assert!(m.wait_queue().contains_node(0));
    }

    #[test]
    fn test_come_moves_to_wait_then_start_to_party() {
        let mut m = discovered(0, &[NodeClass::Hare; 3]);
        force_request(&mut m, 2, 5);

        let out = m.handle(msg(MessageKind::Come, 9, 2, 2)).unwrap();
        assert_eq!(transitions(&out), vec![(NodeState::Want, NodeState::Wait)]);
        assert_eq!(m.pending_slot(), None);
        assert_eq!(m.waiting_for(), Some(2));

        // Contender for the same meadow is remembered, others are ACKed.
        assert!(m.handle(msg(MessageKind::Want, 11, 1, 2)).unwrap().is_empty());
        assert!(m.wait_queue().contains_node(1));
        let out = m.handle(msg(MessageKind::Want, 12, 1, 6)).unwrap();
        assert_eq!(sends(&out), vec![(1, MessageKind::Ack)]);

        // Late ACKs for the abandoned request are ignored.
        assert!(m.handle(msg(MessageKind::Ack, 13, 1, 0)).unwrap().is_empty());

        let out = m.handle(msg(MessageKind::Start, 14, 2, 2)).unwrap();
        assert_eq!(transitions(&out), vec![(NodeState::Wait, NodeState::Party)]);
        assert_eq!(m.state(), NodeState::Party);
    }

    #[test]
    fn test_party_acks_other_meadows_only() {
        let mut m = discovered(0, &[NodeClass::Hare; 2]);
        m.state = NodeState::Party;
        m.waiting_for = Some(3);
        assert!(m.handle(msg(MessageKind::Want, 5, 1, 3)).unwrap().is_empty());
        let out = m.handle(msg(MessageKind::Want, 6, 1, 4)).unwrap();
        assert_eq!(sends(&out), vec![(1, MessageKind::Ack)]);
    }

    #[test]
    fn test_leader_records_late_competitors() {
        let mut m = discovered(0, &[NodeClass::Hare; 2]);
        force_request(&mut m, 2, 3);
        m.handle(msg(MessageKind::Ack, 5, 1, 0)).unwrap();
        assert_eq!(m.state(), NodeState::Decide);

        let out = m.handle(msg(MessageKind::Want, 8, 1, 2)).unwrap();
        assert!(out.is_empty());
        assert!(m.wait_queue().contains_node(1));

        let out = m.handle(msg(MessageKind::Want, 9, 1, 5)).unwrap();
        assert_eq!(sends(&out), vec![(1, MessageKind::Ack)]);
    }

    struct AdmitOne;

    impl AdmissionStrategy for AdmitOne {
        fn admit(&mut self, ctx: AdmissionContext<'_>) -> Admission {
            match ctx.waiters.peek() {
                Some(w) => {
                    let demand = match ctx.class_of(w.node) {
                        Some(NodeClass::Bear) => 4,
                        _ => 1,
                    };
                    if ctx.pool.occupy(ctx.slot, demand).is_ok() {
                        Admission::Start(vec![w.node])
                    } else {
                        Admission::Hold
                    }
                }
                None => Admission::Hold,
            }
        }
    }

    #[test]
    fn test_admission_strategy_sends_start() {
        let mut m = discovered(0, &[NodeClass::Hare, NodeClass::Hare, NodeClass::Bear])
            .with_admission(Box::new(AdmitOne));
        force_request(&mut m, 1, 10);
        // Node 2 asks for the same meadow later: deferred.
        m.handle(msg(MessageKind::Want, 12, 2, 1)).unwrap();
        m.handle(msg(MessageKind::Ack, 13, 1, 0)).unwrap();
        let out = m.handle(msg(MessageKind::Ack, 14, 2, 0)).unwrap();

        assert_eq!(m.state(), NodeState::Decide);
        assert_eq!(sends(&out), vec![(2, MessageKind::Start)]);
        assert!(m.wait_queue().is_empty());
        assert_eq!(m.pool().get(1).unwrap().remaining_capacity, 1);
    }

    #[test]
    fn test_single_node_cluster_leads_immediately() {
        let mut m = machine(0, 1, NodeClass::Bear);
        let mut seen_decide = false;
        let mut out = m.start().unwrap();
        for _ in 0..20 {
            if transitions(&out).iter().any(|(_, to)| *to == NodeState::Decide) {
                seen_decide = true;
                break;
            }
            out = m.on_idle_elapsed().unwrap();
        }
        assert!(seen_decide);
        assert_eq!(m.state(), NodeState::Decide);
        assert!(m.leading().is_some());
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut m = discovered(0, &[NodeClass::Hare; 2]);
        let out = m.finish().unwrap();
        assert_eq!(transitions(&out), vec![(NodeState::Idle, NodeState::Finish)]);
        assert!(m.handle(msg(MessageKind::Want, 5, 1, 0)).unwrap().is_empty());
        assert!(m.finish().unwrap().is_empty());
        assert_eq!(m.idle_window(), None);
    }

    #[test]
    fn test_hare_contention_has_single_leader() {
        let classes = [NodeClass::Hare, NodeClass::Hare, NodeClass::Bear];
        let mut harness = Harness::new((0..3).map(|i| discovered(i, &classes)).collect());

        // Node 1 asks first (ts 10), node 0 later (ts 11), same meadow.
        let out1 = force_request(&mut harness.nodes[1], 3, 10);
        let out0 = force_request(&mut harness.nodes[0], 3, 11);
        harness.route(1, out1);
        harness.route(0, out0);
        harness.settle();

        let (n0, n1) = (&harness.nodes[0], &harness.nodes[1]);
        assert_eq!(n1.state(), NodeState::Decide);
        assert_eq!(n1.leading(), Some(3));
        assert!(n1.wait_queue().contains_node(0));

        assert_eq!(n0.state(), NodeState::Want);
        assert_eq!(n0.outstanding_acks(), Some(1));
        assert!(n0.wait_queue().is_empty());

        // The bear was idle and ACKed both requests.
        assert_eq!(harness.nodes[2].state(), NodeState::Idle);
    }

    #[test]
    fn test_timestamp_tie_broken_by_lower_id() {
        let classes = [NodeClass::Hare; 3];
        let mut harness = Harness::new((0..3).map(|i| discovered(i, &classes)).collect());

        let out2 = force_request(&mut harness.nodes[2], 0, 7);
        let out1 = force_request(&mut harness.nodes[1], 0, 7);
        harness.route(2, out2);
        harness.route(1, out1);
        harness.settle();

        assert_eq!(harness.nodes[1].state(), NodeState::Decide);
        assert_eq!(harness.nodes[2].state(), NodeState::Want);
        assert!(harness.nodes[1].wait_queue().contains_node(2));
    }

    #[test]
    fn test_bear_outranks_earlier_hare() {
        let classes = [NodeClass::Hare, NodeClass::Bear, NodeClass::Hare];
        let mut harness = Harness::new((0..3).map(|i| discovered(i, &classes)).collect());

        let out0 = force_request(&mut harness.nodes[0], 5, 2);
        let out1 = force_request(&mut harness.nodes[1], 5, 30);
        harness.route(0, out0);
        harness.route(1, out1);
        harness.settle();

        // The hare asked earlier, so it concedes nothing to the bear, yet the
        // bear never ACKs the hare: neither leads.
        assert_eq!(harness.nodes[0].state(), NodeState::Want);
        assert_eq!(harness.nodes[0].outstanding_acks(), Some(1));
        assert!(harness.nodes[1].wait_queue().contains_node(0));
        assert_eq!(harness.nodes[1].state(), NodeState::Want);
    }

    #[test]
    fn test_disjoint_requests_both_lead() {
        let classes = [NodeClass::Hare, NodeClass::Bear];
        let mut harness = Harness::new((0..2).map(|i| discovered(i, &classes)).collect());

        let out0 = force_request(&mut harness.nodes[0], 1, 4);
        let out1 = force_request(&mut harness.nodes[1], 2, 4);
        harness.route(0, out0);
        harness.route(1, out1);
        harness.settle();

        assert_eq!(harness.nodes[0].leading(), Some(1));
        assert_eq!(harness.nodes[1].leading(), Some(2));
    }

    #[test]
    fn test_full_discovery_over_harness() {
        let classes = [NodeClass::Hare, NodeClass::Bear, NodeClass::Hare, NodeClass::Bear];
        let nodes = classes
            .iter()
            .enumerate()
            .map(|(i, c)| machine(i as NodeId, classes.len(), *c))
            .collect();
        let mut harness = Harness::new(nodes);
        for i in 0..classes.len() {
            let out = harness.nodes[i].start().unwrap();
            harness.route(i as NodeId, out);
        }
        // Deliver TYPEs only; whatever follows stays queued.
        for i in 0..classes.len() {
            let types: Vec<Message> = harness.inboxes[i]
                .drain(..)
                .filter(|m| m.kind == MessageKind::Type)
                .collect();
            for m in types {
                harness.nodes[i].clock().observe(m.timestamp);
                harness.nodes[i].handle(m).unwrap();
            }
        }
        for node in &harness.nodes {
            assert!(node.discovery_complete());
            assert_eq!(
                node.classes().iter().map(|c| c.unwrap()).collect::<Vec<_>>(),
                classes.to_vec()
            );
            assert_ne!(node.state(), NodeState::Init);
        }
    }
}
