//! Ricart-Agrawala mutual exclusion state machine.
//!
//! The coordinator is Sans-IO: every operation returns the actions the caller
//! must perform. It owns all per-node protocol state (clock, pending
//! requests, replies, deferrals, booking store) and expects its caller to
//! serialize access to it.
//!
//! ```text
//!            request()               all peers replied
//!   Idle ───────────────▶ Requesting ──────────────────▶ InCriticalSection
//!    ▲                        │      and own request first        │
//!    │       withdraw()       │                                   │
//!    ├────────────────────────┘                                   │
//!    │                 release() / CriticalSection::finish()      │
//!    └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - An own request exists exactly when the state is not `Idle`.
//! - Every REQUEST is answered by at most one REPLY, echoing the request's
//!   timestamp: immediately when the requester has priority or this node has
//!   nothing outstanding, otherwise when this node leaves
//!   `Requesting`/`InCriticalSection`. A deferral is dropped only when the
//!   same peer supersedes it with a newer request.
//! - Only replies echoing the current own timestamp count towards quorum, so
//!   replies to a withdrawn request can never grant a later one.
//! - `InCriticalSection` is entered only with a reply from every peer and
//!   with the own record first in the pending queue.
//! - The booking store is mutated locally only inside the critical section.

use std::collections::{BTreeMap, BTreeSet};

use turnstile_proto::{NodeId, PeerMessage, ResourceId, Timestamp};

use crate::{
    clock::LogicalClock,
    error::CoordinatorError,
    queue::{RequestQueue, RequestRecord},
    store::{BookingOutcome, ResourceStore},
};

/// Protocol state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    /// No outstanding request.
    Idle,
    /// Request broadcast, collecting replies.
    Requesting,
    /// Holding the critical section.
    InCriticalSection,
}

/// Input to [`MutexCoordinator::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// The local actor wants the critical section.
    LocalRequest,
    /// A message arrived from a peer.
    Message(PeerMessage),
    /// Book a resource while holding the critical section.
    Book {
        /// Resource to book.
        resource: ResourceId,
    },
    /// Leave the critical section.
    Release,
    /// Abandon a request that has not been granted.
    Withdraw,
}

/// Work the caller must perform on the coordinator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Deliver a message to a peer.
    Send {
        /// Destination node.
        to: NodeId,
        /// Message to deliver.
        message: PeerMessage,
    },

    /// The local request has been granted; the node is now in the critical
    /// section.
    Granted {
        /// The request that won.
        request: RequestRecord,
    },
}

/// Per-node mutual exclusion coordinator.
#[derive(Debug, Clone)]
pub struct MutexCoordinator {
    node_id: NodeId,
    peers: BTreeSet<NodeId>,
    state: CoordinatorState,
    clock: LogicalClock,
    queue: RequestQueue,
    own: Option<RequestRecord>,
    last_issued: Option<Timestamp>,
    replied: BTreeSet<NodeId>,
    deferred: BTreeMap<NodeId, Timestamp>,
    store: ResourceStore,
}

impl MutexCoordinator {
    /// Create a coordinator for `node_id` in a static cluster with `peers`.
    ///
    /// # Errors
    ///
    /// `InvalidMembership` if the peer list contains this node or a
    /// duplicate.
    pub fn new(
        node_id: NodeId,
        peers: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, CoordinatorError> {
        let mut set = BTreeSet::new();
        for peer in peers {
            if peer == node_id {
                return Err(CoordinatorError::InvalidMembership {
                    reason: format!("node {node_id} lists itself as a peer"),
                });
            }
            if !set.insert(peer) {
                return Err(CoordinatorError::InvalidMembership {
                    reason: format!("peer {peer} listed twice"),
                });
            }
        }

        Ok(Self {
            node_id,
            peers: set,
            state: CoordinatorState::Idle,
            clock: LogicalClock::new(),
            queue: RequestQueue::new(),
            own: None,
            last_issued: None,
            replied: BTreeSet::new(),
            deferred: BTreeMap::new(),
            store: ResourceStore::new(),
        })
    }

    /// This node's id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Peer ids in ascending order.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.iter().copied()
    }

    /// Number of peers, which is also the quorum size.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Current protocol state.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Current Lamport clock value.
    pub fn clock(&self) -> Timestamp {
        self.clock.current()
    }

    /// The outstanding own request, if any.
    pub fn own_request(&self) -> Option<RequestRecord> {
        self.own
    }

    /// Replies received for the outstanding request.
    pub fn replies_received(&self) -> usize {
        self.replied.len()
    }

    /// Peers whose request is waiting for our reply.
    pub fn deferred(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.deferred.keys().copied()
    }

    /// Pending requests known to this node.
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Local view of booked resources.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: CoordinatorEvent,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        match event {
            CoordinatorEvent::LocalRequest => self.request(),
            CoordinatorEvent::Message(message) => self.handle_message(message),
            CoordinatorEvent::Book { resource } => {
                let mut section = self.critical_section()?;
                section.book(resource);
                Ok(section.into_actions())
            },
            CoordinatorEvent::Release => self.release(),
            CoordinatorEvent::Withdraw => self.withdraw(),
        }
    }

    /// Issue a request for the critical section and broadcast it.
    ///
    /// With no peers the request is granted at once.
    pub fn request(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if self.state != CoordinatorState::Idle {
            return Err(CoordinatorError::AlreadyRequesting { state: self.state });
        }

        let timestamp = self.clock.tick();
        let own = RequestRecord::new(timestamp, self.node_id);
        self.queue.insert(own);
        self.own = Some(own);
        self.last_issued = Some(timestamp);
        self.replied.clear();
        self.state = CoordinatorState::Requesting;

        tracing::debug!(node = self.node_id, timestamp, peers = self.peers.len(), "broadcasting request");

        let message = PeerMessage::Request { timestamp, from: self.node_id };
        let mut actions = self.broadcast(&message);
        self.try_enter(&mut actions);

        Ok(actions)
    }

    /// Apply a message received from a peer.
    ///
    /// # Errors
    ///
    /// Protocol violations (see [`CoordinatorError::is_protocol_violation`])
    /// leave the state untouched; the caller drops the message.
    pub fn handle_message(
        &mut self,
        message: PeerMessage,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        match message {
            PeerMessage::Request { timestamp, from } => self.handle_request(timestamp, from),
            PeerMessage::Reply { from, timestamp } => self.handle_reply(from, timestamp),
            PeerMessage::ResourceUpdate { resource } => {
                if self.store.merge(resource.clone()) {
                    tracing::debug!(node = self.node_id, %resource, "merged remote booking");
                }
                Ok(Vec::new())
            },
        }
    }

    /// Borrow the critical section. Only valid in `InCriticalSection`.
    ///
    /// The returned guard must be closed with [`CriticalSection::finish`]
    /// (or the coordinator released with [`Self::release`]), otherwise the
    /// node keeps the section and its deferred peers wait forever.
    pub fn critical_section(&mut self) -> Result<CriticalSection<'_>, CoordinatorError> {
        match (self.state, self.own) {
            (CoordinatorState::InCriticalSection, Some(request)) => {
                Ok(CriticalSection { coordinator: self, request, actions: Vec::new() })
            },
            _ => Err(CoordinatorError::NotInCriticalSection { state: self.state }),
        }
    }

    /// Leave the critical section and send every deferred reply.
    pub fn release(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if self.state != CoordinatorState::InCriticalSection {
            return Err(CoordinatorError::NotInCriticalSection { state: self.state });
        }

        tracing::info!(node = self.node_id, deferred = self.deferred.len(), "leaving critical section");
        Ok(self.return_to_idle())
    }

    /// Abandon an ungranted request and send every deferred reply.
    ///
    /// Replies that still arrive for the abandoned request are ignored.
    pub fn withdraw(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if self.state != CoordinatorState::Requesting {
            return Err(CoordinatorError::NotRequesting { state: self.state });
        }

        tracing::info!(
            node = self.node_id,
            replies = self.replied.len(),
            needed = self.peers.len(),
            "withdrawing request"
        );
        Ok(self.return_to_idle())
    }

    fn handle_request(
        &mut self,
        timestamp: Timestamp,
        from: NodeId,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        self.validate_peer(from)?;
        self.clock.observe(timestamp);

        // A peer has at most one outstanding request: a new one supersedes
        // whatever we still hold for it.
        let incoming = RequestRecord::new(timestamp, from);
        self.queue.remove_node(from);
        self.queue.insert(incoming);
        if let Some(stale) = self.deferred.remove(&from) {
            tracing::debug!(
                node = self.node_id,
                peer = from,
                stale,
                "dropping deferral superseded by new request"
            );
        }

        let defer = match (self.state, self.own) {
            (CoordinatorState::InCriticalSection, _) => true,
            (CoordinatorState::Requesting, Some(own)) => own.precedes(&incoming),
            _ => false,
        };
        if defer {
            self.deferred.insert(from, timestamp);
            tracing::debug!(node = self.node_id, peer = from, timestamp, "deferring reply");
            return Ok(Vec::new());
        }

        tracing::debug!(node = self.node_id, peer = from, timestamp, "replying immediately");
        Ok(vec![CoordinatorAction::Send {
            to: from,
            message: PeerMessage::Reply { from: self.node_id, timestamp },
        }])
    }

    fn handle_reply(
        &mut self,
        from: NodeId,
        timestamp: Timestamp,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        self.validate_peer(from)?;

        if self.last_issued.is_none_or(|issued| timestamp > issued) {
            return Err(CoordinatorError::UnexpectedReply { from, timestamp, state: self.state });
        }

        let own = match (self.state, self.own) {
            (CoordinatorState::Requesting, Some(own)) if own.timestamp == timestamp => own,
            (CoordinatorState::InCriticalSection, Some(own)) if own.timestamp == timestamp => {
                return Err(CoordinatorError::DuplicateReply(from));
            },
            _ => {
                tracing::debug!(
                    node = self.node_id,
                    peer = from,
                    timestamp,
                    "ignoring reply to finished request"
                );
                return Ok(Vec::new());
            },
        };

        if !self.replied.insert(from) {
            return Err(CoordinatorError::DuplicateReply(from));
        }

        // The peer only replies once its own earlier requests are done.
        self.queue.retire_before(from, &own);

        tracing::debug!(
            node = self.node_id,
            peer = from,
            received = self.replied.len(),
            needed = self.peers.len(),
            "reply received"
        );

        let mut actions = Vec::new();
        self.try_enter(&mut actions);
        Ok(actions)
    }

    fn try_enter(&mut self, actions: &mut Vec<CoordinatorAction>) {
        if self.state != CoordinatorState::Requesting || self.replied.len() < self.peers.len() {
            return;
        }
        let Some(own) = self.own else {
            return;
        };

        if self.queue.first() != Some(&own) {
            tracing::warn!(
                node = self.node_id,
                own = ?own,
                first = ?self.queue.first(),
                "quorum reached but own request is not first"
            );
            return;
        }

        self.state = CoordinatorState::InCriticalSection;
        tracing::info!(node = self.node_id, timestamp = own.timestamp, "entering critical section");
        actions.push(CoordinatorAction::Granted { request: own });
    }

    fn return_to_idle(&mut self) -> Vec<CoordinatorAction> {
        if let Some(own) = self.own.take() {
            self.queue.remove(&own);
        }
        self.replied.clear();
        self.state = CoordinatorState::Idle;

        let from = self.node_id;
        std::mem::take(&mut self.deferred)
            .into_iter()
            .map(|(to, timestamp)| {
                tracing::debug!(node = from, peer = to, timestamp, "sending deferred reply");
                CoordinatorAction::Send { to, message: PeerMessage::Reply { from, timestamp } }
            })
            .collect()
    }

    fn book(&mut self, resource: ResourceId, actions: &mut Vec<CoordinatorAction>) -> BookingOutcome {
        let outcome = self.store.try_book(resource.clone());
        match outcome {
            BookingOutcome::Booked => {
                tracing::info!(node = self.node_id, %resource, "booked");
                actions.extend(self.broadcast(&PeerMessage::ResourceUpdate { resource }));
            },
            BookingOutcome::AlreadyBooked => {
                tracing::info!(node = self.node_id, %resource, "already booked");
            },
        }
        outcome
    }

    fn broadcast(&self, message: &PeerMessage) -> Vec<CoordinatorAction> {
        self.peers
            .iter()
            .map(|&to| CoordinatorAction::Send { to, message: message.clone() })
            .collect()
    }

    fn validate_peer(&self, from: NodeId) -> Result<(), CoordinatorError> {
        if from == self.node_id {
            return Err(CoordinatorError::SelfAddressed(from));
        }
        if !self.peers.contains(&from) {
            return Err(CoordinatorError::UnknownPeer(from));
        }
        Ok(())
    }
}

/// Exclusive access to the booking store, handed out while the node holds
/// the critical section.
///
/// Collects the actions produced by bookings; [`Self::finish`] releases the
/// section and returns them followed by the deferred replies.
#[derive(Debug)]
pub struct CriticalSection<'a> {
    coordinator: &'a mut MutexCoordinator,
    request: RequestRecord,
    actions: Vec<CoordinatorAction>,
}

impl CriticalSection<'_> {
    /// Node holding the section.
    pub fn node_id(&self) -> NodeId {
        self.coordinator.node_id
    }

    /// The request that was granted.
    pub fn request(&self) -> RequestRecord {
        self.request
    }

    /// Local view of booked resources.
    pub fn store(&self) -> &ResourceStore {
        &self.coordinator.store
    }

    /// Book `resource`, announcing it to every peer on success.
    pub fn book(&mut self, resource: impl Into<ResourceId>) -> BookingOutcome {
        self.coordinator.book(resource.into(), &mut self.actions)
    }

    /// Release the section.
    ///
    /// Returns booking announcements first, then deferred replies, so a peer
    /// granted by our reply has already seen our bookings when messages to
    /// it are delivered in order.
    pub fn finish(self) -> Vec<CoordinatorAction> {
        let mut actions = self.actions;
        tracing::info!(
            node = self.coordinator.node_id,
            deferred = self.coordinator.deferred.len(),
            "leaving critical section"
        );
        actions.extend(self.coordinator.return_to_idle());
        actions
    }

    /// Stop using the section without releasing it and return the booking
    /// announcements gathered so far.
    ///
    /// The coordinator stays in `InCriticalSection`, deferring every request,
    /// until [`MutexCoordinator::release`] is called. Drivers whose sends may
    /// overlap use this to deliver announcements before any reply can leave.
    pub fn into_actions(self) -> Vec<CoordinatorAction> {
        self.actions
    }
}
