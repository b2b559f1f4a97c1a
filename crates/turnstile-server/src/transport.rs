//! TCP peer transport.
//!
//! One message per connection:
//!
//! ```text
//! sender                              receiver
//!   connect ────────────────────────▶ accept
//!   write frame, shutdown(write) ───▶ read frame
//!                                     apply to coordinator
//!   read until EOF ◀───────────────── close
//!   send complete                     execute own actions
//! ```
//!
//! The sender returns only once the receiver has applied the message, so
//! the messages one node sends to a peer take effect in the order sent.
//!
//! The framing helpers are generic over tokio's I/O traits and are shared
//! with the simulated transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use turnstile_core::{Environment, PeerChannel, TransportError};
use turnstile_proto::{FrameHeader, NodeId, PeerMessage, decode_message, encode_message};

use crate::{NodeDriver, ServerError, config::PeerTable};

/// Read one framed message.
pub async fn read_message<R>(reader: &mut R) -> Result<PeerMessage, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header).await?;

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size();

    let mut buf = BytesMut::zeroed(FrameHeader::SIZE + payload_size);
    buf[..FrameHeader::SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    Ok(decode_message(&buf)?)
}

/// Write one framed message and half-close, then wait for the receiver to
/// close its side.
pub async fn write_message<S>(stream: &mut S, message: &PeerMessage) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = encode_message(message)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;

    let mut trailing = [0u8; 1];
    match stream.read(&mut trailing).await? {
        0 => Ok(()),
        _ => Err(ServerError::Transport("peer sent data on a one-way connection".to_string())),
    }
}

/// Serve one inbound connection: read a message, apply it, close, then
/// execute the resulting actions.
pub async fn handle_connection<S, C, E>(
    mut stream: S,
    driver: &NodeDriver<C, E>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: PeerChannel,
    E: Environment,
{
    let message = read_message(&mut stream).await?;
    tracing::trace!(node = driver.node_id(), kind = message.kind(), "received");

    let actions = driver.process(message).await;
    drop(stream);

    driver.execute(actions).await;
    Ok(())
}

/// [`PeerChannel`] over plain TCP, one connection per message.
#[derive(Debug, Clone)]
pub struct TcpPeerChannel {
    peers: PeerTable,
    connect_timeout: Duration,
}

impl TcpPeerChannel {
    /// Default limit on connection establishment.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Channel addressing the peers in `peers`.
    pub fn new(peers: PeerTable) -> Self {
        Self { peers, connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The peer table.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }
}

#[async_trait]
impl PeerChannel for TcpPeerChannel {
    async fn send(&self, peer: NodeId, message: PeerMessage) -> Result<(), TransportError> {
        let address = self.peers.address(peer).ok_or(TransportError::NoRoute(peer))?;
        let failed = |reason: String| TransportError::SendFailed { peer, reason };

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| failed(format!("connect to {address} timed out")))?
            .map_err(|e| failed(format!("connect to {address}: {e}")))?;

        write_message(&mut stream, &message).await.map_err(|e| failed(e.to_string()))?;
        tracing::trace!(peer, kind = message.kind(), "delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;
    use turnstile_proto::ResourceId;

    use super::*;

    #[tokio::test]
    async fn framed_message_crosses_a_stream() {
        let (mut client, mut server) = duplex(1024);
        let message = PeerMessage::ResourceUpdate { resource: ResourceId::from("12") };

        let writer = tokio::spawn(async move {
            write_message(&mut client, &PeerMessage::ResourceUpdate {
                resource: ResourceId::from("12"),
            })
            .await
        });

        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, message);

        // closing the receiving side completes the send
        drop(server);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_header_is_a_protocol_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[tokio::test]
    async fn truncated_stream_is_a_transport_error() {
        let (mut client, mut server) = duplex(64);
        let bytes = encode_message(&PeerMessage::Reply { from: 3, timestamp: 2 }).unwrap();
        client.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
    }

    #[tokio::test]
    async fn unknown_peer_has_no_route() {
        let channel = TcpPeerChannel::new(PeerTable::new());
        let err = channel.send(4, PeerMessage::Reply { from: 0, timestamp: 1 }).await.unwrap_err();
        assert!(matches!(err, TransportError::NoRoute(4)));
    }
}
