//! Turnstile node runtime.
//!
//! This crate runs a [`turnstile_core::MutexCoordinator`] for real:
//! - Tokio for the async runtime
//! - TCP for peer transport, one framed message per connection
//! - System time for critical-section hold and spans
//!
//! ## Architecture
//!
//! ```text
//! turnstile-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ TcpPeerChannel     (PeerChannel over TCP)
//!   ├─ NodeDriver         (serialized coordinator + action execution)
//!   ├─ SendPolicy         (best effort or retry with backoff)
//!   ├─ Console            (operator commands for the binary)
//!   └─ PeerTable          (static membership)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
mod driver;
mod error;
mod executor;
mod system_env;
pub mod transport;

use std::sync::Arc;

pub use config::{NodeConfig, PeerTable};
pub use console::Console;
pub use driver::{CriticalSpan, DriverConfig, DriverError, NodeDriver};
pub use error::ServerError;
pub use executor::{SendPolicy, deliver};
pub use system_env::SystemEnv;
use tokio::net::TcpListener;
pub use transport::{TcpPeerChannel, handle_connection, read_message, write_message};

/// Driver type used by the production runtime.
pub type TcpNodeDriver = NodeDriver<TcpPeerChannel, SystemEnv>;

/// A bound Turnstile node.
///
/// Wraps a `NodeDriver` with a TCP listener for inbound peer messages.
pub struct Server {
    /// The shared node driver
    driver: Arc<TcpNodeDriver>,
    /// Inbound peer listener
    listener: TcpListener,
}

impl Server {
    /// Create and bind a new node.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The membership is invalid
    /// - Binding to the address fails
    pub async fn bind(config: NodeConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address).await?;
        Self::with_listener(listener, config)
    }

    /// Create a node on an already bound listener. `config.listen_address`
    /// is ignored.
    pub fn with_listener(listener: TcpListener, config: NodeConfig) -> Result<Self, ServerError> {
        let coordinator = config
            .coordinator()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let channel = TcpPeerChannel::new(config.peers);
        let driver = Arc::new(NodeDriver::new(coordinator, channel, SystemEnv::new(), config.driver));

        Ok(Self { driver, listener })
    }

    /// Handle for local requests. Stays valid while [`Self::run`] executes.
    pub fn driver(&self) -> Arc<TcpNodeDriver> {
        Arc::clone(&self.driver)
    }

    /// Accept peer connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(node = self.driver.node_id(), "listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let driver = Arc::clone(&self.driver);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &*driver).await {
                            tracing::warn!(node = driver.node_id(), %remote, "connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Get the local address the node is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}
