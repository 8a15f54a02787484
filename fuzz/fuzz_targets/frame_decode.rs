//! Fuzz target for Frame::decode
//!
//! This fuzzer tests frame decoding with arbitrary byte sequences to find:
//! - Parser crashes or panics
//! - Length prefixes that allocate before being checked against the limit
//! - Frames accepted from fewer bytes than they claim
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pipehub_proto::{Frame, FrameHeader};

const MAX_PAYLOAD: u64 = 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data, MAX_PAYLOAD) else {
        return;
    };

    // A decoded frame never claims more than the input held.
    assert!(FrameHeader::SIZE + frame.payload.len() <= data.len());
    assert_eq!(frame.header().payload_size(), frame.payload.len() as u64);

    // Re-encoding reproduces the consumed prefix of the input.
    let mut buf = Vec::new();
    frame.encode(&mut buf);
    assert_eq!(&buf[..], &data[..buf.len()]);

    let _ = frame.to_text();
});
