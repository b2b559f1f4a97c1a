//! Model-based testing of the coordinator.
//!
//! Real coordinators run over an explicit network whose delivery order is
//! chosen by the test. Oracles check safety (mutual exclusion, no double
//! booking, fair grant order, one reply per request) after every operation
//! and liveness (nobody waits once the network is quiet) whenever nothing is
//! in flight.
//!
//! # Design Principles
//!
//! - No mocks: the nodes are the production state machine
//! - The test owns the schedule: any interleaving can be replayed
//! - Deterministic: same operations produce the same trace

pub mod operation;
mod world;

pub use operation::{ModelNodeId, ModelSeat, Operation, OperationError, OperationResult};
pub use world::{
    ClusterWorld, ObservableState, OracleViolation, TraceEvent, random_operation,
};
