//! Outbound delivery policy.
//!
//! Defines how the driver handles a failed send to a peer. The protocol
//! itself never retries: a lost message just means the peer never replies.

use std::time::Duration;

use turnstile_core::{Environment, PeerChannel, TransportError};
use turnstile_proto::{NodeId, PeerMessage};

/// Policy for handling peer send failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Log failure and continue with the next action.
    /// Suitable for simulation where we want to test failure scenarios.
    #[default]
    BestEffort,

    /// Retry failed sends with exponential backoff.
    /// Suitable for production where delivery matters.
    Retry {
        /// Maximum number of attempts, including the first
        max_attempts: u32,
        /// Initial backoff duration in milliseconds
        initial_backoff_ms: u64,
    },
}

impl SendPolicy {
    /// Number of attempts a single send may take.
    pub fn attempts(self) -> u32 {
        match self {
            Self::BestEffort => 1,
            Self::Retry { max_attempts, .. } => max_attempts.max(1),
        }
    }

    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(self, attempt: u32) -> Duration {
        match self {
            Self::BestEffort => Duration::ZERO,
            Self::Retry { initial_backoff_ms, .. } => {
                let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
                Duration::from_millis(initial_backoff_ms.saturating_mul(factor))
            },
        }
    }
}

/// Send `message` to `peer` under `policy`.
///
/// Returns the last error once every attempt has failed.
pub async fn deliver<C, E>(
    channel: &C,
    env: &E,
    policy: SendPolicy,
    peer: NodeId,
    message: PeerMessage,
) -> Result<(), TransportError>
where
    C: PeerChannel,
    E: Environment,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match channel.send(peer, message.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                let backoff = policy.backoff(attempt);
                tracing::debug!(peer, attempt, ?backoff, error = %e, "send failed, retrying");
                env.sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}
