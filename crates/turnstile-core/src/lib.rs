//! Turnstile core: Sans-IO distributed mutual exclusion.
//!
//! Every node runs a [`MutexCoordinator`] implementing the Ricart-Agrawala
//! algorithm over Lamport timestamps. A node enters its critical section
//! after every peer has replied to its request, and while inside it books
//! resources in a replicated [`ResourceStore`].
//!
//! ## Architecture
//!
//! ```text
//! turnstile-core
//!   ├─ MutexCoordinator   (request / reply / defer state machine)
//!   ├─ LogicalClock       (Lamport clock)
//!   ├─ RequestQueue       (pending requests in (timestamp, node) order)
//!   ├─ ResourceStore      (grow-only booking set)
//!   ├─ PeerChannel        (transport seam, implemented by drivers)
//!   └─ Environment        (time seam, system or simulated)
//! ```
//!
//! The coordinator performs no I/O. Callers feed it local requests and peer
//! messages and execute the [`CoordinatorAction`]s it returns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod coordinator;
pub mod env;
pub mod error;
pub mod queue;
pub mod store;
pub mod transport;

pub use clock::LogicalClock;
pub use coordinator::{
    CoordinatorAction, CoordinatorEvent, CoordinatorState, CriticalSection, MutexCoordinator,
};
pub use env::Environment;
pub use error::CoordinatorError;
pub use queue::{RequestQueue, RequestRecord};
pub use store::{BookingOutcome, ResourceStore};
pub use transport::{PeerChannel, TransportError};
