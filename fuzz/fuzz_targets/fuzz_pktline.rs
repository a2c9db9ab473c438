//! Fuzz target for pkt-line parsing.
//!
//! The reader must reject malformed length prefixes without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use tably_protocol::PktLineReader;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot spin forever.
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(pkt)) => {
                let _ = pkt.encode();
            }
            Ok(None) | Err(_) => break,
        }
    }
});
