//! In-memory cluster: independent node actors over unbounded queues.
//!
//! Each node has an inbox served by its own task. A send completes once the
//! receiving actor has applied the message to its coordinator, matching the
//! TCP transport's guarantee, and the receiver's own actions run on a
//! separate task afterwards. Links can be broken and healed at runtime to
//! inject send failures.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use turnstile_core::{CoordinatorError, MutexCoordinator, PeerChannel, TransportError};
use turnstile_proto::{NodeId, PeerMessage};
use turnstile_server::{CriticalSpan, DriverConfig, NodeDriver};

use crate::SimEnv;

/// Driver type of an in-memory node.
pub type MemoryNode = NodeDriver<MemoryChannel, SimEnv>;

type BrokenLinks = Arc<Mutex<BTreeSet<(NodeId, NodeId)>>>;

#[derive(Debug)]
struct Envelope {
    message: PeerMessage,
    applied: oneshot::Sender<()>,
}

/// [`PeerChannel`] into the other actors of a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    from: NodeId,
    inboxes: Arc<BTreeMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
    broken: BrokenLinks,
}

#[async_trait]
impl PeerChannel for MemoryChannel {
    async fn send(&self, peer: NodeId, message: PeerMessage) -> Result<(), TransportError> {
        let link_down =
            self.broken.lock().unwrap_or_else(PoisonError::into_inner).contains(&(self.from, peer));
        if link_down {
            return Err(TransportError::SendFailed { peer, reason: "link down".to_string() });
        }

        let inbox = self.inboxes.get(&peer).ok_or(TransportError::NoRoute(peer))?;
        let (applied, done) = oneshot::channel();

        inbox
            .send(Envelope { message, applied })
            .map_err(|_| TransportError::SendFailed { peer, reason: "inbox closed".to_string() })?;

        done.await
            .map_err(|_| TransportError::SendFailed { peer, reason: "message dropped".to_string() })
    }
}

/// A fully connected cluster of in-memory nodes.
///
/// Must be created inside a tokio runtime. Actors stop when the cluster is
/// dropped.
#[derive(Debug)]
pub struct MemoryCluster {
    nodes: Vec<Arc<MemoryNode>>,
    broken: BrokenLinks,
    actors: Vec<JoinHandle<()>>,
}

impl MemoryCluster {
    /// Start `size` nodes with ids `0..size`.
    ///
    /// # Errors
    ///
    /// `InvalidMembership` if a node's peer list is rejected.
    pub fn start(size: u64, config: DriverConfig) -> Result<Self, CoordinatorError> {
        let broken = BrokenLinks::default();

        let (senders, receivers): (BTreeMap<_, _>, Vec<_>) = (0..size)
            .map(|id| {
                let (tx, rx) = mpsc::unbounded_channel();
                ((id, tx), rx)
            })
            .unzip();
        let inboxes = Arc::new(senders);

        let mut nodes = Vec::new();
        let mut actors = Vec::new();

        for (id, inbox) in (0..size).zip(receivers) {
            let peers = (0..size).filter(|&p| p != id);
            let coordinator = MutexCoordinator::new(id, peers)?;

            let channel =
                MemoryChannel { from: id, inboxes: Arc::clone(&inboxes), broken: Arc::clone(&broken) };
            let node = Arc::new(NodeDriver::new(coordinator, channel, SimEnv::new(), config));

            actors.push(tokio::spawn(run_actor(Arc::clone(&node), inbox)));
            nodes.push(node);
        }

        Ok(Self { nodes, broken, actors })
    }

    /// Node `id`.
    ///
    /// # Panics
    ///
    /// If `id` is not part of the cluster.
    pub fn node(&self, id: NodeId) -> &Arc<MemoryNode> {
        &self.nodes[usize::try_from(id).unwrap_or(usize::MAX)]
    }

    /// All nodes, by id.
    pub fn nodes(&self) -> &[Arc<MemoryNode>] {
        &self.nodes
    }

    /// Make every send from `from` to `to` fail.
    pub fn break_link(&self, from: NodeId, to: NodeId) {
        self.broken.lock().unwrap_or_else(PoisonError::into_inner).insert((from, to));
    }

    /// Restore a broken link.
    pub fn heal_link(&self, from: NodeId, to: NodeId) {
        self.broken.lock().unwrap_or_else(PoisonError::into_inner).remove(&(from, to));
    }

    /// Critical sections of every node, ordered by entry time.
    pub async fn spans(&self) -> Vec<CriticalSpan<tokio::time::Instant>> {
        let mut spans = Vec::new();
        for node in &self.nodes {
            spans.extend(node.history().await);
        }
        spans.sort_by_key(|span| span.entered);
        spans
    }

    /// True if every node is idle with nothing deferred or left to send.
    pub async fn is_quiescent(&self) -> bool {
        for node in &self.nodes {
            let (state, deferred) = node.inspect(|c| (c.state(), c.deferred().count())).await;
            if state != turnstile_core::CoordinatorState::Idle
                || deferred > 0
                || node.pending_sends().await > 0
            {
                return false;
            }
        }
        true
    }
}

impl Drop for MemoryCluster {
    fn drop(&mut self) {
        for actor in &self.actors {
            actor.abort();
        }
    }
}

async fn run_actor(node: Arc<MemoryNode>, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(Envelope { message, applied }) = inbox.recv().await {
        let actions = node.process(message).await;
        let _ = applied.send(());

        let node = Arc::clone(&node);
        tokio::spawn(async move { node.execute(actions).await });
    }
}
