//! # Core Protocol Components
//!
//! Low-level packet handling and framing.
//!
//! This module provides the foundation for the protocol, handling packet framing,
//! encoding/decoding, and wire format.
//!
//! ## Components
//! - **Packet**: The SBTP frame and its stream encoder/decoder
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! ["SBTPv1"(6)] [0x00] [Length(8, BE)] [0x00] [Payload(N)] [0x04]
//! ```
//!
//! ## Security
//! - Maximum payload size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod packet;
