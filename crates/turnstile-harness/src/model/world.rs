//! Cluster world: real coordinators over an explicit, inspectable network.
//!
//! Every node is a [`MutexCoordinator`]. Messages do not move on their own:
//! each directed link is a FIFO queue, and a [`Operation::Deliver`] pops the
//! head of one link. That hands the interleaving to the test, so proptest and
//! the fuzzer explore orders a real network would rarely produce.
//!
//! Oracles run after every operation and collect [`OracleViolation`]s
//! instead of panicking, so a failing run can be shrunk and inspected.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use turnstile_core::{
    BookingOutcome, CoordinatorAction, CoordinatorError, CoordinatorState, MutexCoordinator,
    RequestRecord,
};
use turnstile_proto::{NodeId, PeerMessage, ResourceId, Timestamp};

use super::operation::{ModelNodeId, ModelSeat, Operation, OperationError, OperationResult};

/// Upper bound on deliveries performed by one [`Operation::Settle`].
const SETTLE_LIMIT: usize = 10_000;

/// Something that happened in the world, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A node broadcast a request.
    Requested {
        /// Requesting node.
        node: NodeId,
        /// Timestamp of the request.
        timestamp: Timestamp,
    },
    /// A message moved across a link.
    Delivered {
        /// Sender.
        from: NodeId,
        /// Receiver.
        to: NodeId,
        /// Message kind.
        kind: &'static str,
    },
    /// A node entered the critical section.
    Granted {
        /// The winning request.
        request: RequestRecord,
    },
    /// A booking attempt inside the critical section.
    Booked {
        /// Booking node.
        node: NodeId,
        /// Seat.
        resource: ResourceId,
        /// Result of the attempt.
        outcome: BookingOutcome,
    },
    /// A node left the critical section.
    Released {
        /// Leaving node.
        node: NodeId,
    },
    /// A node abandoned its request.
    Withdrawn {
        /// Withdrawing node.
        node: NodeId,
    },
}

/// A broken safety or liveness property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleViolation {
    /// More than one node in the critical section.
    MutualExclusion {
        /// Nodes holding the section.
        holders: Vec<NodeId>,
    },
    /// A seat was booked successfully twice.
    DoubleBooking {
        /// The seat.
        resource: ResourceId,
        /// Node that booked it first.
        first: NodeId,
        /// Node that booked it again.
        second: NodeId,
    },
    /// A request was granted while an earlier one was outstanding.
    Unfair {
        /// The granted request.
        granted: RequestRecord,
        /// Outstanding request that should have gone first.
        earlier: RequestRecord,
    },
    /// A node rejected a message its peer sent.
    Rejected {
        /// Receiving node.
        node: NodeId,
        /// Why the message was rejected.
        error: CoordinatorError,
    },
    /// A request was answered twice.
    DuplicateReply {
        /// Replying node.
        from: NodeId,
        /// Requesting node.
        to: NodeId,
        /// Timestamp of the answered request.
        timestamp: Timestamp,
    },
    /// Nothing is in flight and nobody holds the section, yet a node is
    /// still waiting.
    Stuck {
        /// Waiting node.
        node: NodeId,
        /// Its state.
        state: CoordinatorState,
    },
    /// An idle node still owes replies.
    LingeringDeferral {
        /// Owing node.
        node: NodeId,
    },
}

impl std::fmt::Display for OracleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MutualExclusion { holders } => {
                write!(f, "nodes {holders:?} are in the critical section together")
            },
            Self::DoubleBooking { resource, first, second } => {
                write!(f, "seat {resource} booked by node {first} and again by node {second}")
            },
            Self::Unfair { granted, earlier } => {
                write!(f, "{granted:?} granted while {earlier:?} was outstanding")
            },
            Self::Rejected { node, error } => write!(f, "node {node} rejected a message: {error}"),
            Self::DuplicateReply { from, to, timestamp } => {
                write!(f, "node {from} answered request {timestamp} of node {to} twice")
            },
            Self::Stuck { node, state } => write!(f, "node {node} stuck in {state:?}"),
            Self::LingeringDeferral { node } => write!(f, "idle node {node} still defers peers"),
        }
    }
}

/// Observable state for determinism comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Per-node protocol state.
    pub states: Vec<CoordinatorState>,
    /// Per-node clock.
    pub clocks: Vec<Timestamp>,
    /// Per-node booked seats, in order.
    pub stores: Vec<Vec<ResourceId>>,
    /// Messages not yet delivered.
    pub in_flight: usize,
}

/// A cluster of coordinators wired through FIFO links.
#[derive(Debug, Clone)]
pub struct ClusterWorld {
    nodes: Vec<MutexCoordinator>,
    links: BTreeMap<(NodeId, NodeId), VecDeque<PeerMessage>>,
    booked_by: BTreeMap<ResourceId, NodeId>,
    replies_sent: BTreeSet<(NodeId, NodeId, Timestamp)>,
    trace: Vec<TraceEvent>,
    violations: Vec<OracleViolation>,
}

impl ClusterWorld {
    /// Fully connected cluster of `size` nodes (at least one).
    pub fn new(size: usize) -> Self {
        let ids: Vec<NodeId> = (0..size.max(1) as u64).collect();
        let nodes = ids
            .iter()
            .filter_map(|&id| {
                MutexCoordinator::new(id, ids.iter().copied().filter(|&p| p != id)).ok()
            })
            .collect();

        Self {
            nodes,
            links: BTreeMap::new(),
            booked_by: BTreeMap::new(),
            replies_sent: BTreeSet::new(),
            trace: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Coordinator of node `id`.
    pub fn node(&self, id: NodeId) -> Option<&MutexCoordinator> {
        usize::try_from(id).ok().and_then(|i| self.nodes.get(i))
    }

    /// Everything that happened so far.
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Oracle violations so far.
    pub fn violations(&self) -> &[OracleViolation] {
        &self.violations
    }

    /// First oracle violation, if any.
    pub fn check(&self) -> Result<(), OracleViolation> {
        self.violations.first().map_or(Ok(()), |v| Err(v.clone()))
    }

    /// Messages not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.links.values().map(VecDeque::len).sum()
    }

    /// Node holding the critical section, if any.
    pub fn holder(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.state() == CoordinatorState::InCriticalSection)
            .map(MutexCoordinator::node_id)
    }

    /// Seats booked anywhere in the cluster, with the booking node.
    pub fn bookings(&self) -> &BTreeMap<ResourceId, NodeId> {
        &self.booked_by
    }

    /// Apply an operation, then run the oracles.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let result = match *op {
            Operation::Request { node } => self.apply_request(self.resolve(node)),
            Operation::Book { node, seat } => self.apply_book(self.resolve(node), seat),
            Operation::Exit { node } => self.apply_exit(self.resolve(node)),
            Operation::Withdraw { node } => self.apply_withdraw(self.resolve(node)),
            Operation::Deliver { link } => self.apply_deliver(link),
            Operation::Settle => {
                self.settle();
                OperationResult::Ok
            },
        };

        self.check_exclusion();
        self.check_quiescence();
        result
    }

    /// Deliver messages until nothing is in flight.
    pub fn settle(&mut self) {
        for _ in 0..SETTLE_LIMIT {
            if self.apply_deliver(0).is_err() {
                return;
            }
        }
        tracing::warn!(in_flight = self.in_flight(), "settle limit reached");
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            states: self.nodes.iter().map(MutexCoordinator::state).collect(),
            clocks: self.nodes.iter().map(MutexCoordinator::clock).collect(),
            stores: self.nodes.iter().map(|n| n.store().iter().cloned().collect()).collect(),
            in_flight: self.in_flight(),
        }
    }

    /// Run `steps` operations drawn from a seeded generator, then settle
    /// and release whoever is granted until the cluster is idle.
    pub fn run_random(size: usize, seed: u64, steps: usize) -> Self {
        let mut world = Self::new(size);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        for _ in 0..steps {
            let op = random_operation(&mut rng);
            world.apply(&op);
        }
        world.drain();
        world
    }

    /// Settle, letting every granted node leave, until no node is waiting.
    pub fn drain(&mut self) {
        for _ in 0..=self.nodes.len() {
            self.apply(&Operation::Settle);
            match self.holder() {
                Some(node) => {
                    let node = ModelNodeId::try_from(node).unwrap_or(ModelNodeId::MAX);
                    self.apply(&Operation::Exit { node });
                },
                None => return,
            }
        }
        self.apply(&Operation::Settle);
    }

    fn resolve(&self, node: ModelNodeId) -> usize {
        usize::from(node) % self.nodes.len().max(1)
    }

    fn apply_request(&mut self, index: usize) -> OperationResult {
        let Some(node) = self.nodes.get_mut(index) else {
            return OperationResult::Ok;
        };
        match node.request() {
            Ok(actions) => {
                let id = node.node_id();
                let timestamp = node.own_request().map_or(0, |r| r.timestamp);
                self.trace.push(TraceEvent::Requested { node: id, timestamp });
                self.dispatch(id, actions);
                OperationResult::Ok
            },
            Err(_) => OperationResult::Error(OperationError::AlreadyRequesting),
        }
    }

    fn apply_book(&mut self, index: usize, seat: ModelSeat) -> OperationResult {
        let Some(node) = self.nodes.get_mut(index) else {
            return OperationResult::Ok;
        };
        let id = node.node_id();
        let resource = seat.resource();

        let Ok(mut section) = node.critical_section() else {
            return OperationResult::Error(OperationError::NotInCriticalSection);
        };
        let outcome = section.book(resource.clone());
        let announcements = section.into_actions();

        if outcome.is_booked() {
            if let Some(&first) = self.booked_by.get(&resource) {
                self.violations.push(OracleViolation::DoubleBooking {
                    resource: resource.clone(),
                    first,
                    second: id,
                });
            } else {
                self.booked_by.insert(resource.clone(), id);
            }
        }

        self.trace.push(TraceEvent::Booked { node: id, resource, outcome });
        self.dispatch(id, announcements);

        match outcome {
            BookingOutcome::Booked => OperationResult::Booked,
            BookingOutcome::AlreadyBooked => OperationResult::AlreadyBooked,
        }
    }

    fn apply_exit(&mut self, index: usize) -> OperationResult {
        let Some(node) = self.nodes.get_mut(index) else {
            return OperationResult::Ok;
        };
        match node.release() {
            Ok(actions) => {
                let id = node.node_id();
                self.trace.push(TraceEvent::Released { node: id });
                self.dispatch(id, actions);
                OperationResult::Ok
            },
            Err(_) => OperationResult::Error(OperationError::NotInCriticalSection),
        }
    }

    fn apply_withdraw(&mut self, index: usize) -> OperationResult {
        let Some(node) = self.nodes.get_mut(index) else {
            return OperationResult::Ok;
        };
        match node.withdraw() {
            Ok(actions) => {
                let id = node.node_id();
                self.trace.push(TraceEvent::Withdrawn { node: id });
                self.dispatch(id, actions);
                OperationResult::Ok
            },
            Err(_) => OperationResult::Error(OperationError::NotRequesting),
        }
    }

    fn apply_deliver(&mut self, link: u8) -> OperationResult {
        let busy: Vec<(NodeId, NodeId)> =
            self.links.iter().filter(|(_, q)| !q.is_empty()).map(|(&k, _)| k).collect();
        if busy.is_empty() {
            return OperationResult::Error(OperationError::NothingInFlight);
        }

        let (from, to) = busy[usize::from(link) % busy.len()];
        let Some(message) = self.links.get_mut(&(from, to)).and_then(VecDeque::pop_front) else {
            return OperationResult::Error(OperationError::NothingInFlight);
        };
        self.trace.push(TraceEvent::Delivered { from, to, kind: message.kind() });

        let Some(receiver) = usize::try_from(to).ok().and_then(|i| self.nodes.get_mut(i)) else {
            return OperationResult::Ok;
        };
        match receiver.handle_message(message) {
            Ok(actions) => self.dispatch(to, actions),
            Err(error) => self.violations.push(OracleViolation::Rejected { node: to, error }),
        }
        OperationResult::Ok
    }

    fn dispatch(&mut self, origin: NodeId, actions: Vec<CoordinatorAction>) {
        for action in actions {
            match action {
                CoordinatorAction::Send { to, message } => {
                    if let PeerMessage::Reply { from, timestamp } = message
                        && !self.replies_sent.insert((from, to, timestamp))
                    {
                        self.violations.push(OracleViolation::DuplicateReply { from, to, timestamp });
                    }
                    self.links.entry((origin, to)).or_default().push_back(message);
                },
                CoordinatorAction::Granted { request } => {
                    self.check_fairness(request);
                    self.trace.push(TraceEvent::Granted { request });
                },
            }
        }
    }

    fn check_fairness(&mut self, granted: RequestRecord) {
        let earlier = self
            .nodes
            .iter()
            .filter(|n| n.node_id() != granted.node_id)
            .filter_map(MutexCoordinator::own_request)
            .filter(|r| r.precedes(&granted))
            .min();

        if let Some(earlier) = earlier {
            self.violations.push(OracleViolation::Unfair { granted, earlier });
        }
    }

    fn check_exclusion(&mut self) {
        let holders: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.state() == CoordinatorState::InCriticalSection)
            .map(MutexCoordinator::node_id)
            .collect();

        if holders.len() > 1 {
            let violation = OracleViolation::MutualExclusion { holders };
            if self.violations.last() != Some(&violation) {
                self.violations.push(violation);
            }
        }
    }

    fn check_quiescence(&mut self) {
        if self.in_flight() > 0 || self.holder().is_some() {
            return;
        }

        for node in &self.nodes {
            let id = node.node_id();
            match node.state() {
                CoordinatorState::Idle if node.deferred().next().is_some() => {
                    self.violations.push(OracleViolation::LingeringDeferral { node: id });
                },
                CoordinatorState::Idle => {},
                state => self.violations.push(OracleViolation::Stuck { node: id, state }),
            }
        }
    }
}

/// Draw one operation, weighted towards traffic so runs make progress.
pub fn random_operation(rng: &mut impl Rng) -> Operation {
    let node: ModelNodeId = rng.gen_range(0..8);
    match rng.gen_range(0..20) {
        0..=3 => Operation::Request { node },
        4..=5 => Operation::Book { node, seat: ModelSeat(rng.gen_range(0..8)) },
        6..=7 => Operation::Exit { node },
        8 => Operation::Withdraw { node },
        9 => Operation::Settle,
        _ => Operation::Deliver { link: rng.gen_range(0..=u8::MAX) },
    }
}
