//! Lamport logical clock.

use turnstile_proto::Timestamp;

/// Process-local Lamport counter.
///
/// The value never decreases. Every request issuance ticks it by one, and
/// every received timestamp pulls it to `max(local, remote) + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock {
    value: Timestamp,
}

impl LogicalClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without advancing.
    pub fn current(&self) -> Timestamp {
        self.value
    }

    /// Advance for a local event and return the new value.
    pub fn tick(&mut self) -> Timestamp {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Merge a timestamp observed on an inbound message and return the new
    /// value.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn tick_increments_by_one() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn observe_jumps_past_remote() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.observe(10), 11);
        assert_eq!(clock.tick(), 12);
    }

    #[test]
    fn observe_of_older_timestamp_still_advances() {
        let mut clock = LogicalClock::new();
        clock.observe(10);
        assert_eq!(clock.observe(3), 12);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut clock = LogicalClock::new();
        clock.observe(u64::MAX);
        assert_eq!(clock.current(), u64::MAX);
        assert_eq!(clock.tick(), u64::MAX);
    }

    #[derive(Debug, Clone)]
    enum ClockOp {
        Tick,
        Observe(u64),
    }

    fn clock_op() -> impl Strategy<Value = ClockOp> {
        prop_oneof![Just(ClockOp::Tick), any::<u64>().prop_map(ClockOp::Observe)]
    }

    proptest! {
        #[test]
        fn never_decreases(ops in prop::collection::vec(clock_op(), 0..100)) {
            let mut clock = LogicalClock::new();
            let mut last = clock.current();

            for op in ops {
                let next = match op {
                    ClockOp::Tick => clock.tick(),
                    ClockOp::Observe(remote) => {
                        let next = clock.observe(remote);
                        prop_assert!(next >= remote);
                        next
                    },
                };
                prop_assert!(next >= last, "clock went from {} to {}", last, next);
                last = next;
            }
        }
    }
}
