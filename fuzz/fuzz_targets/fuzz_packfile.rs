//! Fuzz target for packfile decoding.
//!
//! Covers header validation, object framing and the size cap.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use tably_protocol::PackfileReader;

fuzz_target!(|data: &[u8]| {
    let reader = match PackfileReader::new(Cursor::new(data)) {
        Ok(reader) => reader,
        Err(_) => return,
    };
    let mut reader = reader.with_max_object_size(1 << 20);

    for _ in 0..1000 {
        match reader.read_object() {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
});
