//! Operator console driven over in-memory pipes against a memory cluster.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
};
use turnstile_core::CoordinatorState;
use turnstile_harness::MemoryCluster;
use turnstile_server::{Console, DriverConfig, ServerError};

/// Operator end of a running console.
struct Operator {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    console: JoinHandle<Result<(), ServerError>>,
}

impl Operator {
    fn attach(cluster: &MemoryCluster, id: u64) -> Self {
        let (input, console_in) = tokio::io::duplex(1024);
        let (console_out, output) = tokio::io::duplex(1024);

        let console = Console::new(std::sync::Arc::clone(cluster.node(id)));
        let console = tokio::spawn(console.run(BufReader::new(console_in), console_out));

        Self { input, output: BufReader::new(output).lines(), console }
    }

    async fn send(&mut self, command: &str) {
        self.input.write_all(format!("{command}\n").as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let line = tokio::time::timeout(Duration::from_secs(60), self.output.next_line()).await;
        line.unwrap().unwrap().unwrap()
    }

    async fn ask(&mut self, command: &str) -> String {
        self.send(command).await;
        self.line().await
    }

    async fn quit(mut self) {
        self.send("quit").await;
        self.console.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn books_a_seat_and_lists_it() {
    let cluster = MemoryCluster::start(2, DriverConfig::default()).unwrap();
    let mut operator = Operator::attach(&cluster, 0);

    assert_eq!(operator.ask("book 12").await, "requesting seat 12");
    assert_eq!(operator.line().await, "seat 12 booked");

    assert_eq!(operator.ask("book 12").await, "seat 12 is already booked");
    assert_eq!(operator.ask("seats").await, "booked: [12]");
    assert_eq!(operator.ask("dance").await, "commands: book <seat> | withdraw | seats | quit");

    operator.quit().await;
}

#[tokio::test(start_paused = true)]
async fn stays_responsive_while_a_booking_is_blocked() {
    let cluster = MemoryCluster::start(3, DriverConfig::default()).unwrap();
    cluster.break_link(0, 2);
    let mut operator = Operator::attach(&cluster, 0);

    assert_eq!(operator.ask("book A").await, "requesting seat A");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Requesting);

    assert_eq!(operator.ask("seats").await, "booked: []");
    assert_eq!(operator.ask("book B").await, "a booking is already waiting; withdraw it first");

    assert_eq!(operator.ask("withdraw").await, "request withdrawn");
    assert_eq!(
        operator.line().await,
        "booking seat A failed: request withdrawn before it was granted"
    );
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Idle);

    assert!(operator.ask("withdraw").await.starts_with("nothing to withdraw"));
    operator.quit().await;
}

#[tokio::test(start_paused = true)]
async fn quit_gives_up_a_pending_booking() {
    let cluster = MemoryCluster::start(3, DriverConfig::default()).unwrap();
    cluster.break_link(0, 2);
    let mut operator = Operator::attach(&cluster, 0);

    assert_eq!(operator.ask("book A").await, "requesting seat A");
    tokio::time::sleep(Duration::from_secs(1)).await;

    operator.quit().await;
    assert_eq!(cluster.node(0).state().await, CoordinatorState::Idle);

    // node 2 never heard of the request; node 1 is not left waiting on it
    let other = tokio::time::timeout(Duration::from_secs(30), cluster.node(1).book("A")).await;
    assert!(other.unwrap().unwrap().is_booked());
}
