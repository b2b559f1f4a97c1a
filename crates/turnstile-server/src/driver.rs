//! Node driver: serialized access to the coordinator plus action execution.
//!
//! The driver owns one [`MutexCoordinator`] behind a tokio mutex. Each
//! handling step (a local request, one inbound message, the critical section)
//! locks it once. Sends produced by a step are queued in a FIFO outbox in the
//! same step and delivered after the lock is released, so a slow peer never
//! blocks inbound processing.
//!
//! ```text
//!  local caller ─┐                       ┌─▶ outbox ─▶ PeerChannel::send
//!                ├─▶ lock ─▶ coordinator ┤
//!  inbound msg ──┘                       └─▶ Notify (on Granted)
//! ```
//!
//! # Cancellation
//!
//! A local caller may drop its request future at any await point, typically
//! from `tokio::time::timeout`. The driver stays consistent:
//! - One drainer at a time delivers the outbox in order. An entry leaves the
//!   outbox only once it was sent, so a dropped drainer leaves the rest for
//!   the next one (the interrupted send may be repeated).
//! - The critical action, the booking announcements and the release happen
//!   in one step; announcements are queued ahead of the deferred replies.
//! - A request whose caller went away is marked abandoned. The next step
//!   that sees the mark (an inbound message, [`NodeDriver::withdraw`] or the
//!   next local request) withdraws it, or releases it if it was granted.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use turnstile_core::{
    BookingOutcome, CoordinatorAction, CoordinatorError, CoordinatorState, CriticalSection,
    Environment, MutexCoordinator, PeerChannel, RequestRecord,
};
use turnstile_proto::{NodeId, PeerMessage, ResourceId};

use crate::executor::{self, SendPolicy};

/// Driver configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConfig {
    /// How long to hold the critical section before running the critical
    /// action. Zero skips the wait.
    pub hold: Duration,
    /// Delivery policy for outbound messages.
    pub send_policy: SendPolicy,
}

/// Errors returned to local callers of the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The coordinator rejected the operation.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// The request was withdrawn before it was granted.
    #[error("request withdrawn before it was granted")]
    Withdrawn,
}

/// One completed critical section, as observed by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalSpan<I> {
    /// Node that held the section.
    pub node_id: NodeId,
    /// The granted request.
    pub request: RequestRecord,
    /// When the coordinator entered the section.
    pub entered: I,
    /// When the coordinator released it.
    pub exited: I,
}

#[derive(Debug)]
struct Shared<I> {
    coordinator: MutexCoordinator,
    entered: Option<I>,
    history: Vec<CriticalSpan<I>>,
    outbox: VecDeque<(NodeId, PeerMessage)>,
}

impl<I: Copy> Shared<I> {
    fn note_grant(&mut self, actions: &[CoordinatorAction], now: I) {
        if actions.iter().any(|a| matches!(a, CoordinatorAction::Granted { .. })) {
            self.entered = Some(now);
        }
    }

    fn close_span(&mut self, node_id: NodeId, request: RequestRecord, now: I) {
        let entered = self.entered.take().unwrap_or(now);
        self.history.push(CriticalSpan { node_id, request, entered, exited: now });
    }
}

/// Marks the local request abandoned unless the caller saw it through.
struct Claim<'a> {
    abandoned: &'a AtomicBool,
    settled: bool,
}

impl<'a> Claim<'a> {
    fn new(abandoned: &'a AtomicBool) -> Self {
        Self { abandoned, settled: false }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.abandoned.store(true, Ordering::Release);
        }
    }
}

/// Runtime wrapper around a node's coordinator.
///
/// Shared between the inbound listener and local callers, typically as an
/// `Arc<NodeDriver<..>>`.
pub struct NodeDriver<C, E: Environment> {
    node_id: NodeId,
    shared: Mutex<Shared<E::Instant>>,
    local: Mutex<()>,
    draining: Mutex<()>,
    abandoned: AtomicBool,
    granted: Notify,
    channel: C,
    env: E,
    config: DriverConfig,
}

impl<C, E> NodeDriver<C, E>
where
    C: PeerChannel,
    E: Environment,
{
    /// Create a driver for `coordinator`, sending through `channel`.
    pub fn new(coordinator: MutexCoordinator, channel: C, env: E, config: DriverConfig) -> Self {
        Self {
            node_id: coordinator.node_id(),
            shared: Mutex::new(Shared {
                coordinator,
                entered: None,
                history: Vec::new(),
                outbox: VecDeque::new(),
            }),
            local: Mutex::new(()),
            draining: Mutex::new(()),
            abandoned: AtomicBool::new(false),
            granted: Notify::new(),
            channel,
            env,
            config,
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Driver configuration.
    pub fn config(&self) -> DriverConfig {
        self.config
    }

    /// The outbound channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Current coordinator state.
    pub async fn state(&self) -> CoordinatorState {
        self.shared.lock().await.coordinator.state()
    }

    /// Booked resources known to this node, in order.
    pub async fn booked(&self) -> Vec<ResourceId> {
        self.shared.lock().await.coordinator.store().iter().cloned().collect()
    }

    /// True if this node knows `resource` to be booked.
    pub async fn is_booked(&self, resource: &ResourceId) -> bool {
        self.shared.lock().await.coordinator.store().is_booked(resource)
    }

    /// Critical sections completed on this node, oldest first.
    pub async fn history(&self) -> Vec<CriticalSpan<E::Instant>> {
        self.shared.lock().await.history.clone()
    }

    /// Messages queued but not yet delivered.
    pub async fn pending_sends(&self) -> usize {
        self.shared.lock().await.outbox.len()
    }

    /// Run a closure against the coordinator under the lock.
    pub async fn inspect<T>(&self, f: impl FnOnce(&MutexCoordinator) -> T + Send) -> T {
        f(&self.shared.lock().await.coordinator)
    }

    /// Acquire the distributed critical section and run `critical` inside it.
    ///
    /// Concurrent local callers are queued: one request is outstanding per
    /// node. Waits indefinitely for the grant; bound the wait externally and
    /// call [`Self::withdraw`] to give up. Dropping the returned future is
    /// safe at any point: the driver withdraws or releases the abandoned
    /// request.
    pub async fn request_critical_section<F, T>(&self, critical: F) -> Result<T, DriverError>
    where
        F: FnOnce(&mut CriticalSection<'_>) -> T + Send,
        T: Send,
    {
        let _gate = self.local.lock().await;
        let claim = Claim::new(&self.abandoned);

        let requested = {
            let mut shared = self.shared.lock().await;
            let mut actions = self.reclaim(&mut shared).unwrap_or_default();
            let now = self.env.now();
            let requested = shared.coordinator.request().map(|sent| {
                shared.note_grant(&sent, now);
                actions.extend(sent);
            });
            self.stage(&mut shared, actions);
            requested
        };
        self.drain().await;
        requested?;

        loop {
            match self.state().await {
                CoordinatorState::InCriticalSection => break,
                CoordinatorState::Idle => {
                    tracing::info!(node = self.node_id, "request withdrawn while waiting");
                    claim.settle();
                    return Err(DriverError::Withdrawn);
                },
                CoordinatorState::Requesting => self.granted.notified().await,
            }
        }

        if !self.config.hold.is_zero() {
            self.env.sleep(self.config.hold).await;
        }

        // Announcements precede the deferred replies in the outbox, so a
        // peer granted by our reply has already applied our bookings.
        let value = {
            let mut shared = self.shared.lock().await;
            let mut section = shared.coordinator.critical_section()?;
            let value = critical(&mut section);
            let request = section.request();
            let actions = section.finish();

            shared.close_span(self.node_id, request, self.env.now());
            self.stage(&mut shared, actions);
            value
        };
        claim.settle();
        self.drain().await;

        Ok(value)
    }

    /// Book `resource` inside the critical section.
    pub async fn book(&self, resource: impl Into<ResourceId>) -> Result<BookingOutcome, DriverError> {
        let resource = resource.into();
        self.request_critical_section(move |section| section.book(resource)).await
    }

    /// Abandon the outstanding request and flush deferred replies.
    ///
    /// A caller blocked in [`Self::request_critical_section`] returns
    /// [`DriverError::Withdrawn`]. A request whose caller has already gone
    /// away is cleaned up even if it was granted meanwhile. Fails with
    /// `NotRequesting` when there is nothing to give up, including a live
    /// caller that already holds the section.
    pub async fn withdraw(&self) -> Result<(), DriverError> {
        {
            let mut shared = self.shared.lock().await;
            let actions = match self.reclaim(&mut shared) {
                Some(actions) => actions,
                None => shared.coordinator.withdraw()?,
            };
            self.stage(&mut shared, actions);
        }

        self.granted.notify_one();
        self.drain().await;
        Ok(())
    }

    /// Apply an inbound message to the coordinator without executing the
    /// resulting actions.
    ///
    /// Transports that acknowledge delivery call this, acknowledge, then
    /// pass the actions to [`Self::execute`]. Protocol violations are logged
    /// and dropped.
    pub async fn process(&self, message: PeerMessage) -> Vec<CoordinatorAction> {
        let kind = message.kind();
        let mut shared = self.shared.lock().await;

        let mut actions = match shared.coordinator.handle_message(message) {
            Ok(actions) => {
                shared.note_grant(&actions, self.env.now());
                actions
            },
            Err(e) => {
                tracing::warn!(node = self.node_id, kind, error = %e, "dropping message");
                Vec::new()
            },
        };
        if let Some(reclaimed) = self.reclaim(&mut shared) {
            actions.retain(|a| !matches!(a, CoordinatorAction::Granted { .. }));
            actions.extend(reclaimed);
        }
        actions
    }

    /// Apply an inbound message and execute the resulting actions.
    pub async fn handle_message(&self, message: PeerMessage) {
        let actions = self.process(message).await;
        self.execute(actions).await;
    }

    /// Execute coordinator actions in order.
    ///
    /// Sends join the outbox behind anything still queued. Send failures are
    /// logged; the remaining sends still run.
    pub async fn execute(&self, actions: Vec<CoordinatorAction>) {
        {
            let mut shared = self.shared.lock().await;
            self.stage(&mut shared, actions);
        }
        self.drain().await;
    }

    /// Queue sends and wake the local caller on a grant.
    fn stage(&self, shared: &mut Shared<E::Instant>, actions: Vec<CoordinatorAction>) {
        for action in actions {
            match action {
                CoordinatorAction::Send { to, message } => shared.outbox.push_back((to, message)),
                CoordinatorAction::Granted { request } => {
                    tracing::debug!(node = self.node_id, timestamp = request.timestamp, "waking local caller");
                    self.granted.notify_one();
                },
            }
        }
    }

    /// Deliver the outbox in order.
    ///
    /// Returns at once if another task is already draining; that task picks
    /// up whatever was queued.
    async fn drain(&self) {
        let Ok(draining) = self.draining.try_lock() else {
            return;
        };

        loop {
            let (to, message) = {
                let shared = self.shared.lock().await;
                let Some(entry) = shared.outbox.front() else {
                    // Let go of the drain while still holding the state, so
                    // a sender that queues after this check drains itself.
                    drop(draining);
                    return;
                };
                entry.clone()
            };

            let kind = message.kind();
            if let Err(e) =
                executor::deliver(&self.channel, &self.env, self.config.send_policy, to, message).await
            {
                tracing::warn!(node = self.node_id, peer = to, kind, error = %e, "send failed");
            }
            self.shared.lock().await.outbox.pop_front();
        }
    }

    /// Withdraw or release a request whose local caller went away.
    ///
    /// Returns `None` when nothing was abandoned or it is already idle.
    fn reclaim(&self, shared: &mut Shared<E::Instant>) -> Option<Vec<CoordinatorAction>> {
        if !self.abandoned.swap(false, Ordering::AcqRel) {
            return None;
        }

        match shared.coordinator.state() {
            CoordinatorState::Idle => None,
            CoordinatorState::Requesting => {
                tracing::info!(node = self.node_id, "withdrawing abandoned request");
                shared
                    .coordinator
                    .withdraw()
                    .inspect_err(|e| tracing::warn!(node = self.node_id, error = %e, "withdraw failed"))
                    .ok()
            },
            CoordinatorState::InCriticalSection => {
                tracing::info!(node = self.node_id, "releasing abandoned critical section");
                let request = shared.coordinator.own_request()?;
                let actions = shared
                    .coordinator
                    .release()
                    .inspect_err(|e| tracing::warn!(node = self.node_id, error = %e, "release failed"))
                    .ok()?;
                shared.close_span(self.node_id, request, self.env.now());
                Some(actions)
            },
        }
    }
}

impl<C, E: Environment> std::fmt::Debug for NodeDriver<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDriver")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
