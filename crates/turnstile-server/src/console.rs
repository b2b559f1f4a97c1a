//! Line-oriented operator console.
//!
//! Reads commands from any async reader and answers on any async writer;
//! the binary wires it to stdin and stdout. A booking runs on its own task,
//! so the console keeps reading while a request waits for its grant and the
//! operator can give up on it.
//!
//! | command       | effect                                              |
//! |---------------|-----------------------------------------------------|
//! | `book <seat>` | request the critical section and book the seat      |
//! | `withdraw`    | abandon the booking that is waiting for its grant   |
//! | `seats`       | list the seats this node knows to be booked         |
//! | `quit`        | withdraw any pending booking and stop               |

use std::sync::Arc;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use turnstile_core::{BookingOutcome, Environment, PeerChannel};
use turnstile_proto::ResourceId;

use crate::{DriverError, NodeDriver, ServerError};

const USAGE: &str = "commands: book <seat> | withdraw | seats | quit";

enum Step {
    Reply(String),
    Skip,
    Quit,
}

/// Operator console for one node.
pub struct Console<C, E: Environment> {
    driver: Arc<NodeDriver<C, E>>,
    booking: Option<JoinHandle<String>>,
}

impl<C, E> Console<C, E>
where
    C: PeerChannel,
    E: Environment,
{
    /// Console driving `driver`.
    pub fn new(driver: Arc<NodeDriver<C, E>>) -> Self {
        Self { driver, booking: None }
    }

    /// Serve commands from `input` until `quit` or end of input.
    ///
    /// A booking still pending at that point is withdrawn.
    ///
    /// # Errors
    ///
    /// Fails if reading a command or writing a reply fails.
    pub async fn run<R, W>(mut self, input: R, mut output: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            let reply = tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => match self.command(&line).await {
                        Step::Reply(reply) => reply,
                        Step::Skip => continue,
                        Step::Quit => break,
                    },
                    None => break,
                },
                reply = self.finished() => reply,
            };

            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        self.shutdown().await;
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Step {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("book"), Some(seat), None) => Step::Reply(self.book(ResourceId::from(seat)).await),
            (Some("withdraw"), None, _) => Step::Reply(match self.driver.withdraw().await {
                Ok(()) => "request withdrawn".to_string(),
                Err(e) => format!("nothing to withdraw: {e}"),
            }),
            (Some("seats"), None, _) => {
                let booked = self.driver.booked().await;
                let list: Vec<&str> = booked.iter().map(ResourceId::as_str).collect();
                Step::Reply(format!("booked: [{}]", list.join(", ")))
            },
            (Some("quit"), None, _) => Step::Quit,
            (None, ..) => Step::Skip,
            _ => Step::Reply(USAGE.to_string()),
        }
    }

    async fn book(&mut self, seat: ResourceId) -> String {
        if self.booking.is_some() {
            return "a booking is already waiting; withdraw it first".to_string();
        }
        if self.driver.is_booked(&seat).await {
            return format!("seat {seat} is already booked");
        }

        tracing::info!(node = self.driver.node_id(), %seat, "requesting critical section");
        let driver = Arc::clone(&self.driver);
        let requested = format!("requesting seat {seat}");
        self.booking = Some(tokio::spawn(async move {
            let outcome = driver.book(seat.clone()).await;
            describe(&seat, outcome)
        }));
        requested
    }

    /// Outcome line of the pending booking; never resolves without one.
    async fn finished(&mut self) -> String {
        let Some(task) = self.booking.as_mut() else {
            return std::future::pending().await;
        };

        let reply = task.await.unwrap_or_else(|e| format!("booking task failed: {e}"));
        self.booking = None;
        reply
    }

    async fn shutdown(mut self) {
        let Some(task) = self.booking.take() else {
            return;
        };

        task.abort();
        let _ = task.await;
        if let Err(e) = self.driver.withdraw().await {
            tracing::debug!(node = self.driver.node_id(), error = %e, "nothing left to withdraw");
        }
    }
}

fn describe(seat: &ResourceId, outcome: Result<BookingOutcome, DriverError>) -> String {
    match outcome {
        Ok(BookingOutcome::Booked) => format!("seat {seat} booked"),
        Ok(BookingOutcome::AlreadyBooked) => format!("seat {seat} was taken by another node"),
        Err(e) => format!("booking seat {seat} failed: {e}"),
    }
}
