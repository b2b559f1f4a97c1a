//! Fuzz target for a coordinator fed hostile peer messages.
//!
//! # Strategy
//!
//! - Local events (request, book, release, withdraw) interleaved with
//!   arbitrary inbound messages from known peers, strangers and ourselves
//! - Timestamps from the whole `u64` range, including `u64::MAX`
//!
//! # Invariants
//!
//! - NEVER panic
//! - The clock never goes backwards
//! - An own request exists exactly when the node is not idle
//! - A rejected message leaves the state untouched

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use turnstile_core::{CoordinatorState, MutexCoordinator};
use turnstile_proto::{PeerMessage, ResourceId};

#[derive(Debug, Arbitrary)]
enum Event {
    Request,
    Book { seat: u8 },
    Release,
    Withdraw,
    PeerRequest { timestamp: u64, from: u8 },
    PeerReply { from: u8, timestamp: u64 },
    PeerUpdate { seat: u8 },
}

fuzz_target!(|events: Vec<Event>| {
    let Ok(mut node) = MutexCoordinator::new(0, [1, 2, 3]) else {
        return;
    };

    for event in events {
        let clock = node.clock();
        let state = node.state();

        match event {
            Event::Request => {
                let _ = node.request();
            },
            Event::Book { seat } => {
                if let Ok(mut section) = node.critical_section() {
                    section.book(seat.to_string());
                    let _ = section.into_actions();
                }
            },
            Event::Release => {
                let _ = node.release();
            },
            Event::Withdraw => {
                let _ = node.withdraw();
            },
            Event::PeerRequest { timestamp, from } => {
                let message = PeerMessage::Request { timestamp, from: u64::from(from % 5) };
                if node.handle_message(message).is_err() {
                    assert_eq!(node.clock(), clock);
                    assert_eq!(node.state(), state);
                }
            },
            Event::PeerReply { from, timestamp } => {
                let message = PeerMessage::Reply { from: u64::from(from % 5), timestamp };
                if node.handle_message(message).is_err() {
                    assert_eq!(node.state(), state);
                }
            },
            Event::PeerUpdate { seat } => {
                let resource = ResourceId::new(seat.to_string());
                node.handle_message(PeerMessage::ResourceUpdate { resource })
                    .expect("updates are always accepted");
            },
        }

        assert!(node.clock() >= clock, "clock went backwards");
        assert_eq!(node.own_request().is_some(), node.state() != CoordinatorState::Idle);
    }
});
