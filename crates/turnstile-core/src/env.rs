//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the node runtime from wall-clock
//! resources. The coordinator itself never reads time: ordering comes from
//! the Lamport clock alone. Time is only used by drivers, to hold the
//! critical section and to stamp critical-section spans for observers.
//!
//! - Deterministic simulation: turmoil and paused tokio time provide a
//!   virtual clock.
//! - Production runtime: system time and tokio timers, with no change to the
//!   protocol logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state between nodes

use std::{fmt::Debug, future::Future, time::Duration};

/// Abstract environment providing time and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point in time as seen by this environment.
    type Instant: Copy + Ord + Debug + Send + Sync + 'static;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps; the coordinator is synchronous.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
