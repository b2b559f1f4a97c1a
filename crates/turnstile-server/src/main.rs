//! Turnstile node binary.
//!
//! # Usage
//!
//! ```bash
//! # Three-node local cluster, node i listening on 5000 + i
//! turnstile-node --id 0 --nodes 3
//! turnstile-node --id 1 --nodes 3
//! turnstile-node --id 2 --nodes 3
//!
//! # Explicit membership
//! turnstile-node --id 0 --listen 0.0.0.0:7000 --peer 1=10.0.0.2:7000 --peer 2=10.0.0.3:7000
//! ```
//!
//! Commands are read from stdin: `book <seat>`, `withdraw`, `seats`, `quit`.
//! A booking waits in the background, so `withdraw` can abandon one that is
//! blocked by an unreachable peer.

use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_server::{
    Console, DriverConfig, NodeConfig, PeerTable, SendPolicy, Server, ServerError,
    config::DEFAULT_BASE_PORT,
};

/// Turnstile node
#[derive(Parser, Debug)]
#[command(name = "turnstile-node")]
#[command(about = "Distributed mutual exclusion node for seat booking")]
#[command(version)]
struct Args {
    /// This node's id
    #[arg(long)]
    id: u64,

    /// Address to accept peer connections on (default 0.0.0.0:<base-port + id>)
    #[arg(short, long)]
    listen: Option<String>,

    /// Peer as <id>=<host:port>; repeat for each peer
    #[arg(long = "peer", value_name = "ID=ADDR")]
    peers: Vec<String>,

    /// Size of a local cluster addressed as localhost:<base-port + id>
    #[arg(long, conflicts_with = "peers")]
    nodes: Option<u64>,

    /// First port of a local cluster
    #[arg(long, default_value_t = DEFAULT_BASE_PORT)]
    base_port: u16,

    /// Milliseconds to hold the critical section before booking
    #[arg(long, default_value = "1000")]
    hold_ms: u64,

    /// Send attempts per message (1 = best effort)
    #[arg(long, default_value = "1")]
    retry_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig, ServerError> {
        let mut config = match self.nodes {
            Some(nodes) => NodeConfig::localhost_cluster(self.id, nodes, self.base_port)?,
            None if !self.peers.is_empty() => NodeConfig {
                node_id: self.id,
                listen_address: String::new(),
                peers: PeerTable::from_entries(self.peers.iter().map(String::as_str), self.id)?,
                driver: DriverConfig::default(),
            },
            None => {
                return Err(ServerError::Config("either --nodes or --peer is required".to_string()));
            },
        };

        config.listen_address = match (&self.listen, self.nodes) {
            (Some(listen), _) => listen.clone(),
            (None, Some(_)) => config.listen_address,
            (None, None) => {
                let port = u16::try_from(self.id)
                    .ok()
                    .and_then(|id| self.base_port.checked_add(id))
                    .ok_or_else(|| ServerError::Config("--listen is required for this id".to_string()))?;
                format!("0.0.0.0:{port}")
            },
        };

        config.driver = DriverConfig {
            hold: Duration::from_millis(self.hold_ms),
            send_policy: if self.retry_attempts > 1 {
                SendPolicy::Retry { max_attempts: self.retry_attempts, initial_backoff_ms: 100 }
            } else {
                SendPolicy::BestEffort
            },
        };

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let config = args.node_config()?;

    tracing::info!("Turnstile node {} starting", config.node_id);
    tracing::info!("Peers: {:?}", config.peers.ids().collect::<Vec<_>>());

    let server = Server::bind(config).await?;
    let console = Console::new(server.driver());

    tracing::info!("Node listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        result = console.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => result?,
    }

    Ok(())
}
