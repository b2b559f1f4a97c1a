//! Simulated environment.
//!
//! Time comes from tokio's clock. Inside a turmoil host, or a tokio test
//! with paused time, that clock is virtual and advances only when every task
//! is idle, so runs are reproducible.

use std::time::Duration;

use turnstile_core::env::Environment;

/// Environment for simulation and paused-time tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a new simulated environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
