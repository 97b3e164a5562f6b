//! Fuzz target for frame and message parsing.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - A frame that decodes re-encodes to the same bytes
//! - A parsed message survives its own encoding unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;

use reflex_duel::network::codec::{decode, FRAME_LEN};
use reflex_duel::Message;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = decode(data) else {
        return;
    };
    assert_eq!(&frame.to_bytes()[..], &data[..FRAME_LEN]);

    if let Ok(message) = Message::try_from(frame) {
        // Unused payload bits are dropped, so compare after one more trip.
        let again = Message::try_from(message.to_frame());
        assert_eq!(again.ok(), Some(message));
        let _ = message.body.expects_ack();
    }
});
