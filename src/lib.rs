//! # SBTP
//!
//! A minimal request/response protocol framed over a byte stream.
//!
//! A [`Client`] sends one framed request and waits for one framed response on
//! a persistent connection. A [`Server`] accepts many concurrent connections,
//! runs an ordered chain of handlers against each request, and writes the
//! framed response back.
//!
//! ## Modules
//! - [`core`]: the packet format, its stream codec and a `tokio_util` codec
//! - [`transport`]: TCP, Unix socket and in-memory connections
//! - [`protocol`]: the handler chain
//! - [`service`]: client and server
//! - [`config`], [`error`], [`utils`]: configuration, errors, deadlines,
//!   logging and metrics
//!
//! ## Wire Format
//! ```text
//! ["SBTPv1"(6)] [0x00] [Length(8, BE)] [0x00] [Payload(N)] [0x04]
//! ```
//!
//! There is no authentication, encryption or multiplexing: one packet per
//! request, one per response, one exchange in flight per connection.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::service::client::Client;
pub use crate::service::server::{Server, ServerState};
