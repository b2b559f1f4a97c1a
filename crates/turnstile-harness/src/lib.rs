//! Deterministic simulation harness for Turnstile.
//!
//! Three ways to run a cluster without real sockets:
//!
//! - [`memory`]: independent node actors over in-memory channels, with link
//!   failure injection. Pairs with tokio's paused clock.
//! - [`sim_transport`]: nodes on turmoil hosts talking the production wire
//!   format over simulated TCP, for latency and partition scenarios.
//! - [`model`]: coordinators over a test-scheduled network with oracle
//!   checks after every operation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod model;
pub mod sim_env;
pub mod sim_transport;

pub use memory::{MemoryChannel, MemoryCluster, MemoryNode};
pub use model::{
    ClusterWorld, ModelNodeId, ModelSeat, ObservableState, Operation, OperationError,
    OperationResult, OracleViolation, TraceEvent,
};
pub use sim_env::SimEnv;
pub use sim_transport::{SIM_PORT, SimNode, SimPeerChannel, host_name, serve, start_node};
