//! Fuzz target for the streaming frame decoder.
//!
//! The input is split into chunks at fuzzer-chosen points and pushed one chunk
//! at a time, the way a radio hands bytes over between polls.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - Chunking does not change which frames come out
//! - The buffer never grows without bound

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use reflex_duel::network::codec::{decode_stream, FrameDecoder, MAX_BUFFERED_BYTES};

#[derive(Debug, Arbitrary)]
struct Input {
    bytes: Vec<u8>,
    cuts: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let whole = decode_stream(&input.bytes);

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut rest = input.bytes.as_slice();
    for cut in &input.cuts {
        let at = usize::from(*cut).min(rest.len());
        let (chunk, tail) = rest.split_at(at);
        decoder.push(chunk);
        frames.extend(decoder.drain_frames());
        rest = tail;
    }
    decoder.push(rest);
    frames.extend(decoder.drain_frames());

    // Longer inputs overflow the one-shot decoder.
    if input.bytes.len() <= MAX_BUFFERED_BYTES {
        assert_eq!(frames, whole);
    }
    assert!(decoder.buffered() <= MAX_BUFFERED_BYTES);
});
