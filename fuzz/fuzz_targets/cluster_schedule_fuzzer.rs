//! Fuzz target for whole-cluster schedules.
//!
//! The fuzzer picks the cluster size, the local operations and the exact
//! delivery order; the world's oracles judge the outcome.
//!
//! # Invariants
//!
//! - At most one node in the critical section
//! - No seat booked twice
//! - Grants follow `(timestamp, node)` order
//! - Every request answered exactly once; no message rejected
//! - After draining, every node is idle and owes no replies

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use turnstile_harness::{ClusterWorld, Operation};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    size: u8,
    ops: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let mut world = ClusterWorld::new(usize::from(input.size % 6) + 1);

    for op in &input.ops {
        world.apply(op);
        if let Err(violation) = world.check() {
            panic!("{violation} after {op:?}");
        }
    }

    world.drain();
    if let Err(violation) = world.check() {
        panic!("{violation} after drain");
    }
});
