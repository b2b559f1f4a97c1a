//! The shared booking set.

use std::collections::BTreeSet;

use turnstile_proto::ResourceId;

/// Result of a booking attempt.
///
/// A conflict is an ordinary negative answer, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOutcome {
    /// The resource was free and is now booked by this node.
    Booked,
    /// The resource was already booked.
    AlreadyBooked,
}

impl BookingOutcome {
    /// True for a successful booking.
    pub fn is_booked(self) -> bool {
        matches!(self, Self::Booked)
    }
}

/// Booked resource identifiers known to this node.
///
/// Local bookings happen only inside the critical section. Remote
/// announcements are merged with union semantics, so the set only grows.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    booked: BTreeSet<ResourceId>,
}

impl ResourceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Book `resource` unless it is already taken.
    pub fn try_book(&mut self, resource: ResourceId) -> BookingOutcome {
        if self.booked.insert(resource) { BookingOutcome::Booked } else { BookingOutcome::AlreadyBooked }
    }

    /// Merge a remote announcement. Returns true if the resource was new to
    /// this node. Never removes anything.
    pub fn merge(&mut self, resource: ResourceId) -> bool {
        self.booked.insert(resource)
    }

    /// True if `resource` is booked.
    pub fn is_booked(&self, resource: &ResourceId) -> bool {
        self.booked.contains(resource)
    }

    /// Number of booked resources.
    pub fn len(&self) -> usize {
        self.booked.len()
    }

    /// True if nothing is booked.
    pub fn is_empty(&self) -> bool {
        self.booked.is_empty()
    }

    /// Booked resources in order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.booked.iter()
    }
}
