//! # Packet
//!
//! A single SBTP frame carrying an opaque byte payload.
//!
//! ```text
//! | Version  | NUL    | Content-Length | NUL    | Payload              | EOT    |
//! | "SBTPv1" | 0x00   | u64 big-endian | 0x00   | Content-Length bytes | 0x04   |
//! | 6 bytes  | 1 byte | 8 bytes        | 1 byte |                      | 1 byte |
//! ```
//!
//! Stream decoding never trusts a single `read` call to fill a buffer: every
//! field is accumulated until its declared size is reached or the stream ends.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::{BYTE_EOT, BYTE_NULL, HEADER_LEN, MAX_PAYLOAD_SIZE, PACKET_VERSION, TRAILER_LEN};
use crate::error::{ProtocolError, Result};
use crate::transport::Endpoint;

const VERSION_LEN: usize = PACKET_VERSION.len();
const LENGTH_OFFSET: usize = VERSION_LEN + 1;
const LENGTH_LEN: usize = 8;
const SECOND_SEPARATOR_OFFSET: usize = LENGTH_OFFSET + LENGTH_LEN;

/// Upper bound on the buffer reserved up front for a payload; larger payloads
/// grow as bytes arrive.
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

/// One framed SBTP message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Where the packet logically came from. Never sent on the wire.
    pub source: Endpoint,
    pub payload: Vec<u8>,
}

impl Packet {
    /// An empty packet attributed to `source`.
    pub fn new(source: Endpoint) -> Self {
        Self {
            source,
            payload: Vec::new(),
        }
    }

    /// A packet with an unknown source carrying `payload`.
    pub fn from_payload(payload: Vec<u8>) -> Self {
        Self {
            source: Endpoint::Unknown,
            payload,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload<P: Into<Vec<u8>>>(&mut self, payload: P) {
        self.payload = payload.into();
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    /// Number of bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + TRAILER_LEN
    }

    /// Build the fixed 16-byte header for a payload of `content_length` bytes.
    pub fn encode_header(content_length: u64) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..VERSION_LEN].copy_from_slice(PACKET_VERSION);
        header[VERSION_LEN] = BYTE_NULL;
        header[LENGTH_OFFSET..SECOND_SEPARATOR_OFFSET]
            .copy_from_slice(&content_length.to_be_bytes());
        header[SECOND_SEPARATOR_OFFSET] = BYTE_NULL;
        header
    }

    /// Serialize to a contiguous frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&Self::encode_header(self.payload.len() as u64));
        out.extend_from_slice(&self.payload);
        out.push(BYTE_EOT);
        out
    }

    /// Parse exactly one frame from `bytes`, using the default payload limit.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_limit(bytes, MAX_PAYLOAD_SIZE)
    }

    /// Parse exactly one frame from `bytes`.
    ///
    /// Truncated input maps to the error of the first field that is missing,
    /// and bytes beyond the terminator are rejected with `LengthMismatch`.
    pub fn from_bytes_with_limit(bytes: &[u8], max_payload_size: usize) -> Result<Self> {
        let content_length = match validate_header_prefix(bytes)? {
            Some(len) => len,
            None => return Err(truncated_header_error(bytes.len())),
        };
        let len = checked_payload_len(content_length, max_payload_size)?;

        let body = &bytes[HEADER_LEN..];
        if body.len() < len {
            return Err(ProtocolError::ShortPayload {
                expected: content_length,
                received: body.len() as u64,
            });
        }
        if body.len() == len || body[len] != BYTE_EOT {
            return Err(ProtocolError::MissingTerminator);
        }

        let frame_len = HEADER_LEN + len + TRAILER_LEN;
        if bytes.len() != frame_len {
            return Err(ProtocolError::LengthMismatch {
                expected: frame_len as u64,
                actual: bytes.len() as u64,
            });
        }

        Ok(Self::from_payload(body[..len].to_vec()))
    }

    /// Decode one frame from `reader` into this packet, replacing its payload.
    ///
    /// Returns the number of bytes consumed. A stream that ends before the
    /// first byte of a frame yields `ConnectionClosed`.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.read_from_with_limit(reader, MAX_PAYLOAD_SIZE).await
    }

    /// Like [`Packet::read_from`], refusing payloads above `max_payload_size`.
    pub async fn read_from_with_limit<R>(
        &mut self,
        reader: &mut R,
        max_payload_size: usize,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut version = [0u8; VERSION_LEN];
        match read_full(reader, &mut version).await? {
            0 => return Err(ProtocolError::ConnectionClosed),
            n if n < VERSION_LEN => return Err(ProtocolError::BadVersion),
            _ => {}
        }
        if &version != PACKET_VERSION {
            return Err(ProtocolError::BadVersion);
        }

        expect_byte(reader, BYTE_NULL, ProtocolError::MissingSeparator).await?;

        let mut length = [0u8; LENGTH_LEN];
        let n = read_full(reader, &mut length).await?;
        if n < LENGTH_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: LENGTH_LEN as u64,
                actual: n as u64,
            });
        }
        let content_length = u64::from_be_bytes(length);

        expect_byte(reader, BYTE_NULL, ProtocolError::MissingSeparator).await?;

        let len = checked_payload_len(content_length, max_payload_size)?;
        let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY));
        let received = (&mut *reader).take(content_length).read_to_end(&mut payload).await?;
        if received < len {
            return Err(ProtocolError::ShortPayload {
                expected: content_length,
                received: received as u64,
            });
        }

        expect_byte(reader, BYTE_EOT, ProtocolError::MissingTerminator).await?;

        self.payload = payload;
        let total = (HEADER_LEN + len + TRAILER_LEN) as u64;
        trace!(bytes = total, "Packet decoded");
        Ok(total)
    }

    /// Encode this packet onto `writer` and flush it.
    ///
    /// Partial writes are retried until the whole frame is out; a writer that
    /// stops accepting bytes yields an `Io` error. Returns bytes written.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_to_with_limit(writer, MAX_PAYLOAD_SIZE).await
    }

    /// Like [`Packet::write_to`], refusing payloads above `max_payload_size`.
    pub async fn write_to_with_limit<W>(&self, writer: &mut W, max_payload_size: usize) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.payload.len() > max_payload_size {
            return Err(ProtocolError::OversizedPacket(self.payload.len() as u64));
        }

        let header = Self::encode_header(self.payload.len() as u64);
        writer.write_all(&header).await?;
        writer.write_all(&self.payload).await?;
        writer.write_all(&[BYTE_EOT]).await?;
        writer.flush().await?;

        let total = self.wire_len() as u64;
        trace!(bytes = total, "Packet encoded");
        Ok(total)
    }
}

/// Validate whatever prefix of a header is present in `buf`.
///
/// Returns `Ok(None)` while the header is incomplete but consistent so far,
/// and the declared content length once all 16 bytes are present.
pub(crate) fn validate_header_prefix(buf: &[u8]) -> Result<Option<u64>> {
    let tag_len = buf.len().min(VERSION_LEN);
    if buf[..tag_len] != PACKET_VERSION[..tag_len] {
        return Err(ProtocolError::BadVersion);
    }
    if buf.len() > VERSION_LEN && buf[VERSION_LEN] != BYTE_NULL {
        return Err(ProtocolError::MissingSeparator);
    }
    if buf.len() > SECOND_SEPARATOR_OFFSET && buf[SECOND_SEPARATOR_OFFSET] != BYTE_NULL {
        return Err(ProtocolError::MissingSeparator);
    }
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut length = [0u8; LENGTH_LEN];
    length.copy_from_slice(&buf[LENGTH_OFFSET..SECOND_SEPARATOR_OFFSET]);
    Ok(Some(u64::from_be_bytes(length)))
}

/// The error for a header cut short after `available` bytes.
pub(crate) fn truncated_header_error(available: usize) -> ProtocolError {
    match available {
        n if n < VERSION_LEN => ProtocolError::BadVersion,
        n if n == VERSION_LEN || n == SECOND_SEPARATOR_OFFSET => ProtocolError::MissingSeparator,
        n => ProtocolError::LengthMismatch {
            expected: LENGTH_LEN as u64,
            actual: (n - LENGTH_OFFSET) as u64,
        },
    }
}

/// Check a declared content length against the payload limit.
pub(crate) fn checked_payload_len(content_length: u64, max_payload_size: usize) -> Result<usize> {
    match usize::try_from(content_length) {
        Ok(len) if len <= max_payload_size => Ok(len),
        _ => Err(ProtocolError::OversizedPacket(content_length)),
    }
}

/// Fill `buf` from `reader`, stopping early only at end-of-stream.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn expect_byte<R>(reader: &mut R, expected: u8, err: ProtocolError) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut byte = [0u8; 1];
    if read_full(reader, &mut byte).await? == 0 || byte[0] != expected {
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Packet::encode_header(0x0102_0304_0506_0708);
        assert_eq!(&header[..6], b"SBTPv1");
        assert_eq!(header[6], 0x00);
        assert_eq!(&header[7..15], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(header[15], 0x00);
    }

    #[test]
    fn test_wire_len_matches_to_bytes() {
        let packet = Packet::from_payload(b"Hello!".to_vec());
        assert_eq!(packet.wire_len(), 16 + 6 + 1);
        assert_eq!(packet.to_bytes().len(), packet.wire_len());
    }

    #[test]
    fn test_prefix_validation_is_incremental() {
        let frame = Packet::from_payload(vec![9; 3]).to_bytes();
        for end in 0..HEADER_LEN {
            assert!(matches!(validate_header_prefix(&frame[..end]), Ok(None)));
        }
        assert!(matches!(
            validate_header_prefix(&frame[..HEADER_LEN]),
            Ok(Some(3))
        ));
        assert!(matches!(
            validate_header_prefix(b"SBTQ"),
            Err(ProtocolError::BadVersion)
        ));
    }

    #[test]
    fn test_checked_payload_len() {
        assert_eq!(checked_payload_len(10, 10).ok(), Some(10));
        assert!(matches!(
            checked_payload_len(11, 10),
            Err(ProtocolError::OversizedPacket(11))
        ));
    }

    #[tokio::test]
    async fn test_read_from_preserves_source() {
        let frame = Packet::from_payload(b"abc".to_vec()).to_bytes();
        let source = Endpoint::Tcp("127.0.0.1:4000".parse().unwrap());
        let mut packet = Packet::new(source.clone());

        let consumed = packet.read_from(&mut &frame[..]).await.unwrap();

        assert_eq!(consumed, frame.len() as u64);
        assert_eq!(packet.payload(), b"abc");
        assert_eq!(packet.source(), &source);
    }

    #[tokio::test]
    async fn test_read_from_empty_stream_is_clean_close() {
        let mut packet = Packet::default();
        let mut empty: &[u8] = &[];
        let result = packet.read_from(&mut empty).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
