//! Fuzz target for upload-pack and receive-pack message parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use tably_protocol::protocol::{
    parse_acks, parse_advertisement, parse_receive_pack_reply, parse_updates, UploadPackRequest,
};
use tably_protocol::PktLineReader;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = UploadPackRequest::parse(Cursor::new(data)) {
        // Anything accepted must survive re-encoding.
        let encoded = request.to_bytes().expect("encode parsed request");
        let reparsed = UploadPackRequest::parse(Cursor::new(encoded)).expect("reparse");
        assert_eq!(request, reparsed);
    }

    let _ = parse_acks(Cursor::new(data));
    let _ = parse_advertisement(Cursor::new(data));
    let _ = parse_receive_pack_reply(Cursor::new(data));
    let _ = parse_updates(&mut PktLineReader::new(Cursor::new(data)));
});
