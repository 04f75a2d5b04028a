#![no_main]

use libfuzzer_sys::fuzz_target;
use sbtp::Packet;

fuzz_target!(|data: &[u8]| {
    // Any input must decode or fail cleanly; a decoded frame must re-encode to the input
    if let Ok(packet) = Packet::from_bytes(data) {
        assert_eq!(packet.to_bytes(), data);
    }
});
