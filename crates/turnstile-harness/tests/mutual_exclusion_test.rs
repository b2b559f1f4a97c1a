//! Mutual exclusion scenarios on the in-memory cluster.
//!
//! Every node is an independent actor; the clock is paused, so hold times
//! and timeouts advance virtually and the runs are reproducible.

use std::{sync::Arc, time::Duration};

use turnstile_core::{BookingOutcome, CoordinatorState};
use turnstile_harness::MemoryCluster;
use turnstile_proto::ResourceId;
use turnstile_server::{DriverConfig, DriverError, SendPolicy};

fn held(secs: u64) -> DriverConfig {
    DriverConfig { hold: Duration::from_secs(secs), ..Default::default() }
}

/// Yield until every actor has run dry.
async fn quiesce(cluster: &MemoryCluster) {
    for _ in 0..100 {
        if cluster.is_quiescent().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("cluster did not quiesce");
}

#[tokio::test(start_paused = true)]
async fn nodes_are_indexed_by_id() {
    let cluster = MemoryCluster::start(4, DriverConfig::default()).unwrap();

    assert_eq!(cluster.nodes().len(), 4);
    for id in 0..4 {
        assert_eq!(cluster.node(id).node_id(), id);
        assert_eq!(cluster.node(id).inspect(|c| c.peer_count()).await, 3);
    }
}

#[tokio::test(start_paused = true)]
async fn tied_requests_favor_lower_node_id() {
    let cluster = MemoryCluster::start(3, held(1)).unwrap();

    // Both requests are stamped before either is delivered.
    let zero = Arc::clone(cluster.node(0));
    let two = Arc::clone(cluster.node(2));
    let (first, second) = tokio::join!(
        zero.request_critical_section(|section| (section.request(), section.book("A"))),
        two.request_critical_section(|section| {
            let a = section.book("A");
            let b = section.book("B");
            (section.request(), a, b)
        }),
    );

    let (zero_request, zero_a) = first.unwrap();
    let (two_request, two_a, two_b) = second.unwrap();

    assert_eq!(zero_request.timestamp, two_request.timestamp, "timestamps tie");
    assert_eq!(zero_a, BookingOutcome::Booked);
    assert_eq!(two_a, BookingOutcome::AlreadyBooked);
    assert_eq!(two_b, BookingOutcome::Booked);

    let spans = cluster.spans().await;
    assert_eq!(spans.iter().map(|s| s.node_id).collect::<Vec<_>>(), vec![0, 2]);
}

#[tokio::test(start_paused = true)]
async fn uncontended_node_enters_after_two_replies() {
    let cluster = MemoryCluster::start(3, DriverConfig::default()).unwrap();

    let replies = cluster
        .node(1)
        .request_critical_section(|section| section.store().len())
        .await
        .unwrap();
    assert_eq!(replies, 0);

    let spans = cluster.spans().await;
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].node_id, 1);
    quiesce(&cluster).await;
}

#[tokio::test(start_paused = true)]
async fn critical_sections_never_overlap() {
    let cluster = MemoryCluster::start(4, held(1)).unwrap();

    let tasks: Vec<_> = (0..4u64)
        .flat_map(|id| (0..3).map(move |round| (id, round)))
        .map(|(id, round)| {
            let node = Arc::clone(cluster.node(id));
            tokio::spawn(async move { node.book(format!("{id}-{round}")).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), BookingOutcome::Booked);
    }

    let spans = cluster.spans().await;
    assert_eq!(spans.len(), 12);
    for pair in spans.windows(2) {
        assert!(
            pair[0].exited <= pair[1].entered,
            "node {} entered before node {} left",
            pair[1].node_id,
            pair[0].node_id
        );
    }

    quiesce(&cluster).await;
    for node in cluster.nodes() {
        assert_eq!(node.booked().await.len(), 12);
    }
}

#[tokio::test(start_paused = true)]
async fn contended_seat_is_booked_once() {
    let cluster = MemoryCluster::start(5, held(1)).unwrap();

    let tasks: Vec<_> = cluster
        .nodes()
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            tokio::spawn(async move { node.book("17").await })
        })
        .collect();

    let mut booked = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_booked() {
            booked += 1;
        }
    }
    assert_eq!(booked, 1);
}

#[tokio::test(start_paused = true)]
async fn failing_link_keeps_requester_waiting() {
    let cluster = MemoryCluster::start(3, DriverConfig::default()).unwrap();
    cluster.break_link(0, 2);

    let waiting = tokio::time::timeout(Duration::from_secs(30), cluster.node(0).book("A")).await;
    assert!(waiting.is_err(), "request must not be granted without node 2");
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Requesting);

    // the other nodes are not disturbed
    assert_eq!(cluster.node(1).state().await, CoordinatorState::Idle);
    assert_eq!(cluster.node(2).state().await, CoordinatorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn withdraw_unblocks_the_cluster() {
    let cluster = MemoryCluster::start(3, DriverConfig::default()).unwrap();
    cluster.break_link(0, 2);

    let waiter = {
        let node = Arc::clone(cluster.node(0));
        tokio::spawn(async move { node.book("A").await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;

    // node 1 asks while node 0 holds priority
    let blocked = {
        let node = Arc::clone(cluster.node(1));
        tokio::spawn(async move { node.book("A").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cluster.node(1).state().await, CoordinatorState::Requesting);

    cluster.node(0).withdraw().await.unwrap();
    assert_eq!(waiter.await.unwrap(), Err(DriverError::Withdrawn));

    assert_eq!(blocked.await.unwrap().unwrap(), BookingOutcome::Booked);
    quiesce(&cluster).await;
    assert!(cluster.node(2).is_booked(&ResourceId::from("A")).await);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_rides_out_a_short_outage() {
    let config = DriverConfig {
        send_policy: SendPolicy::Retry { max_attempts: 6, initial_backoff_ms: 100 },
        ..Default::default()
    };
    let cluster = Arc::new(MemoryCluster::start(2, config).unwrap());
    cluster.break_link(1, 0);

    let healer = {
        let cluster = Arc::clone(&cluster);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cluster.heal_link(1, 0);
        })
    };

    let outcome = tokio::time::timeout(Duration::from_secs(10), cluster.node(1).book("9")).await;
    healer.await.unwrap();

    assert_eq!(outcome.unwrap().unwrap(), BookingOutcome::Booked);
    assert!(cluster.node(0).is_booked(&ResourceId::from("9")).await);
}

#[tokio::test(start_paused = true)]
async fn timed_out_holder_is_released_by_withdraw() {
    let cluster = MemoryCluster::start(2, held(5)).unwrap();

    // gives up while holding the section, before the critical action
    let gave_up = tokio::time::timeout(Duration::from_secs(2), cluster.node(0).book("A")).await;
    assert!(gave_up.is_err());
    assert_eq!(cluster.node(0).state().await, CoordinatorState::InCriticalSection);

    cluster.node(0).withdraw().await.unwrap();
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Idle);

    let next = tokio::time::timeout(Duration::from_secs(30), cluster.node(1).book("A")).await;
    assert_eq!(next.unwrap().unwrap(), BookingOutcome::Booked);
    quiesce(&cluster).await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_section_is_released_for_the_next_requester() {
    let cluster = MemoryCluster::start(2, held(5)).unwrap();

    let gave_up = tokio::time::timeout(Duration::from_secs(2), cluster.node(0).book("A")).await;
    assert!(gave_up.is_err());

    // no withdraw: node 1's request is enough to free the section
    let next = tokio::time::timeout(Duration::from_secs(30), cluster.node(1).book("A")).await;
    assert_eq!(next.unwrap().unwrap(), BookingOutcome::Booked);

    quiesce(&cluster).await;
    assert!(cluster.node(0).is_booked(&ResourceId::from("A")).await);
    assert_eq!(cluster.node(0).history().await.len(), 1, "the abandoned section is still recorded");
}

#[tokio::test(start_paused = true)]
async fn late_grant_for_abandoned_request_is_released() {
    let cluster = MemoryCluster::start(2, held(5)).unwrap();

    let holder = {
        let node = Arc::clone(cluster.node(1));
        tokio::spawn(async move { node.book("A").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    // deferred by node 1, times out before the grant arrives
    let gave_up = tokio::time::timeout(Duration::from_secs(2), cluster.node(0).book("B")).await;
    assert!(gave_up.is_err());
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Requesting);

    assert_eq!(holder.await.unwrap().unwrap(), BookingOutcome::Booked);
    quiesce(&cluster).await;
    assert!(!cluster.node(1).is_booked(&ResourceId::from("B")).await);

    // the grant was handed straight back
    assert!(matches!(cluster.node(0).withdraw().await, Err(DriverError::Coordinator(_))));
    let again = tokio::time::timeout(Duration::from_secs(30), cluster.node(1).book("C")).await;
    assert_eq!(again.unwrap().unwrap(), BookingOutcome::Booked);
}
