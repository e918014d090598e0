//! Error types for the RUDP stack

use thiserror::Error;

/// Result type for RUDP operations
pub type Result<T> = std::result::Result<T, RudpError>;

/// Errors surfaced by the public API.
///
/// Protocol-level anomalies (malformed packets, unknown types, packets for
/// unknown peers) are never errors: they are counted and dropped, as the
/// wire contract requires.
#[derive(Error, Debug)]
pub enum RudpError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Operation on a handle that names no live socket
    #[error("Unknown socket handle")]
    UnknownSocket,

    /// Payload larger than the per-packet maximum
    #[error("Payload of {len} bytes exceeds the {max}-byte packet maximum")]
    PayloadTooLarge { len: usize, max: usize },

    /// Send attempted on a socket whose close has been requested
    #[error("Socket is closing")]
    SocketClosing,

    /// Peer address family the protocol cannot carry
    #[error("Unsupported peer address: {addr} (IPv4 only)")]
    UnsupportedAddress { addr: std::net::SocketAddr },
}

impl RudpError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        RudpError::Config {
            message: message.into(),
        }
    }

    /// Check if this error is an argument problem rather than an I/O failure
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            RudpError::Config { .. }
                | RudpError::UnknownSocket
                | RudpError::PayloadTooLarge { .. }
                | RudpError::SocketClosing
                | RudpError::UnsupportedAddress { .. }
        )
    }
}
