#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_protocol::codec::{decode_envelope, encode_envelope};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding untrusted frames must never panic, only return Err.
    if let Ok(envelope) = decode_envelope(text) {
        let _ = encode_envelope(&envelope);
    }
});
