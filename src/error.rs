//! # Error Types
//!
//! Error handling for the SBTP client, server and packet codec.
//!
//! This module defines every error variant that can occur while framing,
//! transporting or serving packets.
//!
//! ## Error Categories
//! - **Wire violations**: bad version tag, missing separator or terminator,
//!   short payload, length mismatch, oversized packet
//! - **I/O Errors**: transport failures, clean end-of-stream, deadline expiry
//! - **Client state**: operations attempted with no connection
//! - **Handler failures**: reported by a handler, logged by the server
//! - **Deadline failures**: a deadline that cannot be computed
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use sbtp::core::packet::Packet;
//! use sbtp::error::ProtocolError;
//!
//! let mut frame = Packet::from_payload(b"hi".to_vec()).to_bytes();
//! frame[0] = b'X';
//!
//! match Packet::from_bytes(&frame) {
//!     Err(ProtocolError::BadVersion) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Client state errors
    pub const ERR_NOT_CONNECTED: &str = "Not connected";

    /// Deadline errors
    pub const ERR_ZERO_DEADLINE: &str = "Deadline duration must be greater than zero";
    pub const ERR_DEADLINE_OVERFLOW: &str = "Deadline overflows the monotonic clock";

    /// Server lifecycle errors
    pub const ERR_ALREADY_RUNNING: &str = "Server accept loop is already running";
}

// ProtocolError is the primary error type for all SBTP operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid packet version")]
    BadVersion,

    #[error("Packet header missing null separator")]
    MissingSeparator,

    #[error("Payload missing EOT terminator")]
    MissingTerminator,

    #[error("Short payload: expected {expected} bytes, received {received}")]
    ShortPayload { expected: u64, received: u64 },

    #[error("Content-length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(u64),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Deadline error: {0}")]
    Deadline(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("{}", constants::ERR_ALREADY_RUNNING)]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error is a violation of the wire format.
    pub fn is_wire_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadVersion
                | ProtocolError::MissingSeparator
                | ProtocolError::MissingTerminator
                | ProtocolError::ShortPayload { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::OversizedPacket(_)
        )
    }

    /// Whether this error means the peer went away rather than misbehaved.
    ///
    /// Call sites that can tolerate a disconnect treat these quietly.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Convenience constructor for handler failures.
    pub fn handler<S: Into<String>>(msg: S) -> Self {
        ProtocolError::Handler(msg.into())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
