#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use sbtp::PacketCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the input in two pieces to cover partial-frame handling
    let split = data.first().map_or(0, |b| *b as usize).min(data.len());
    let mut codec = PacketCodec::with_max_payload_size(64 * 1024);
    let mut buf = BytesMut::from(&data[..split]);

    for piece in [&data[split..], &[][..]] {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
        buf.extend_from_slice(piece);
    }
    let _ = codec.decode_eof(&mut buf);
});
