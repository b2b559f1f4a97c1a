//! Server error types.

use std::fmt;

use turnstile_core::TransportError;
use turnstile_proto::ProtocolError;

use crate::driver::DriverError;

/// Errors that can occur in the node runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// Malformed frame from a peer
    Protocol(ProtocolError),

    /// Driver error
    Driver(DriverError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Driver(err) => Some(err),
            Self::Config(_) | Self::Transport(_) => None,
        }
    }
}

impl From<DriverError> for ServerError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Encode(err) => Self::Protocol(err),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn protocol_error_keeps_source() {
        let err = ServerError::from(ProtocolError::UnsupportedVersion(9));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("protocol error"));
    }

    #[test]
    fn io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(ServerError::from(io), ServerError::Transport(_)));
    }

    #[test]
    fn no_route_is_transport() {
        let err = ServerError::from(TransportError::NoRoute(3));
        assert_eq!(err.to_string(), "transport error: no route to node 3");
    }
}
