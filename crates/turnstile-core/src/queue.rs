//! Pending request bookkeeping.

use std::collections::BTreeSet;

use turnstile_proto::{NodeId, Timestamp};

/// One pending claim on the critical section.
///
/// Ordered lexicographically by `(timestamp, node_id)`: the node id breaks
/// timestamp ties, so any two distinct records are strictly ordered on every
/// node. The field order below defines the derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestRecord {
    /// Lamport timestamp of the claim.
    pub timestamp: Timestamp,
    /// Node that issued the claim.
    pub node_id: NodeId,
}

impl RequestRecord {
    /// Create a record.
    pub fn new(timestamp: Timestamp, node_id: NodeId) -> Self {
        Self { timestamp, node_id }
    }

    /// True if this record is granted before `other`.
    pub fn precedes(&self, other: &Self) -> bool {
        self < other
    }
}

/// Requests currently known to a node: its own, if any, plus peer requests
/// it has seen and not yet retired.
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    records: BTreeSet<RequestRecord>,
}

impl RequestQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false if it was already present.
    pub fn insert(&mut self, record: RequestRecord) -> bool {
        self.records.insert(record)
    }

    /// Remove a single record. Returns false if it was absent.
    pub fn remove(&mut self, record: &RequestRecord) -> bool {
        self.records.remove(record)
    }

    /// Remove every record of `node_id`. Returns how many were removed.
    pub fn remove_node(&mut self, node_id: NodeId) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.node_id != node_id);
        before - self.records.len()
    }

    /// Remove the records of `node_id` that are ordered before `bound`.
    /// Returns how many were removed.
    pub fn retire_before(&mut self, node_id: NodeId, bound: &RequestRecord) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.node_id != node_id || !r.precedes(bound));
        before - self.records.len()
    }

    /// Record with the highest priority.
    pub fn first(&self) -> Option<&RequestRecord> {
        self.records.first()
    }

    /// The record of `node_id` with the highest priority, if any.
    pub fn of_node(&self, node_id: NodeId) -> Option<&RequestRecord> {
        self.records.iter().find(|r| r.node_id == node_id)
    }

    /// True if `record` is present.
    pub fn contains(&self, record: &RequestRecord) -> bool {
        self.records.contains(record)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &RequestRecord> + '_ {
        self.records.iter()
    }
}
