//! # Packet Codec
//!
//! `tokio_util` framing for SBTP packets, for callers that prefer
//! `Framed<T, PacketCodec>` over driving [`Packet::read_from`] by hand.
//!
//! Validation matches the stream decoder: a corrupt header byte is rejected
//! as soon as it is buffered, and the declared length is checked against the
//! payload limit before any space is reserved for the payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{BYTE_EOT, HEADER_LEN, MAX_PAYLOAD_SIZE, TRAILER_LEN};
use crate::core::packet::{checked_payload_len, validate_header_prefix, Packet};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let header_end = src.len().min(HEADER_LEN);
        let content_length = match validate_header_prefix(&src[..header_end])? {
            Some(len) => len,
            None => {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }
        };
        let len = checked_payload_len(content_length, self.max_payload_size)?;

        let frame_len = HEADER_LEN + len + TRAILER_LEN;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        if src[frame_len - 1] != BYTE_EOT {
            return Err(ProtocolError::MissingTerminator);
        }

        let mut frame = src.split_to(frame_len);
        frame.advance(HEADER_LEN);
        frame.truncate(len);

        Ok(Some(Packet::from_payload(frame.to_vec())))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            // A partial frame at end-of-stream: report which field was cut short
            None => {
                let err = Packet::from_bytes_with_limit(buf, self.max_payload_size)
                    .err()
                    .unwrap_or(ProtocolError::ConnectionClosed);
                buf.clear();
                Err(err)
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        if packet.payload.len() > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(packet.payload.len() as u64));
        }

        dst.reserve(packet.wire_len());
        dst.put_slice(&Packet::encode_header(packet.payload.len() as u64));
        dst.put_slice(&packet.payload);
        dst.put_u8(BYTE_EOT);
        Ok(())
    }
}
