//! Fixed-size frame codec with stream resynchronization.
//!
//! Every message on the link is a 7-byte [`Frame`]:
//!
//! ```text
//! [0] 0x0A start marker
//! [1] destination id
//! [2] source id
//! [3] command code
//! [4] data high byte
//! [5] data low byte
//! [6] CRC8 over bytes 1..=5
//! ```
//!
//! [`encode`] and [`decode`] are pure functions over exactly one frame.
//! [`FrameDecoder`] accepts an arbitrary byte stream (a serial line, or a radio
//! that may deliver truncated or concatenated payloads) and yields the valid
//! frames in order. On a bad checksum or a false start marker it discards
//! exactly one byte and resumes scanning, so it never blocks on garbage.
//!
//! # Examples
//!
//! ```
//! use reflex_duel::network::codec::{decode, encode, FrameDecoder};
//!
//! let bytes = encode(0x00, 0x03, 0x26, 95);
//! let frame = decode(&bytes).expect("freshly encoded frame is valid");
//! assert_eq!(frame.data, 95);
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.push(&[0xFF, 0x13]);
//! decoder.push(&bytes);
//! assert_eq!(decoder.next_frame(), Some(frame));
//! assert_eq!(decoder.next_frame(), None);
//! ```

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::checksum::crc8;
use crate::DuelError;

/// First byte of every frame.
pub const START_MARKER: u8 = 0x0A;

/// Length of a frame on the wire.
pub const FRAME_LEN: usize = 7;

/// Upper bound on bytes buffered by a [`FrameDecoder`] before the oldest are discarded.
pub const MAX_BUFFERED_BYTES: usize = 1024;

/// One decoded wire frame.
///
/// The fields are raw bytes; [`Message`](crate::network::messages::Message)
/// gives them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// Destination device id.
    pub dest: u8,
    /// Source device id.
    pub src: u8,
    /// Command code.
    pub cmd: u8,
    /// Big-endian payload assembled from data-high and data-low.
    pub data: u16,
}

impl Frame {
    /// Creates a frame from its fields.
    #[must_use]
    pub const fn new(dest: u8, src: u8, cmd: u8, data: u16) -> Self {
        Self {
            dest,
            src,
            cmd,
            data,
        }
    }

    /// Creates a frame whose payload is given as two separate bytes.
    #[must_use]
    pub const fn with_bytes(dest: u8, src: u8, cmd: u8, high: u8, low: u8) -> Self {
        Self::new(dest, src, cmd, ((high as u16) << 8) | low as u16)
    }

    /// High byte of the payload.
    #[must_use]
    pub const fn data_high(&self) -> u8 {
        (self.data >> 8) as u8
    }

    /// Low byte of the payload.
    #[must_use]
    pub const fn data_low(&self) -> u8 {
        (self.data & 0xFF) as u8
    }

    /// The five bytes covered by the checksum.
    #[must_use]
    pub const fn payload(&self) -> [u8; 5] {
        [
            self.dest,
            self.src,
            self.cmd,
            self.data_high(),
            self.data_low(),
        ]
    }

    /// Checksum this frame carries on the wire.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        crc8(&self.payload())
    }

    /// Serializes the frame.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let [dest, src, cmd, high, low] = self.payload();
        [START_MARKER, dest, src, cmd, high, low, self.checksum()]
    }
}

/// Why a byte sequence was rejected as a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecError {
    /// Fewer than [`FRAME_LEN`] bytes were supplied.
    Truncated {
        /// Number of bytes available.
        len: usize,
    },
    /// The first byte is not [`START_MARKER`].
    BadStartMarker {
        /// The byte found in its place.
        found: u8,
    },
    /// The trailing CRC does not match the payload.
    ChecksumMismatch {
        /// CRC computed over the payload.
        expected: u8,
        /// CRC carried by the frame.
        found: u8,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "truncated frame: {} of {} bytes", len, FRAME_LEN)
            }
            Self::BadStartMarker { found } => {
                write!(f, "bad start marker 0x{:02X}", found)
            }
            Self::ChecksumMismatch { expected, found } => {
                write!(
                    f,
                    "checksum mismatch: computed 0x{:02X}, frame carries 0x{:02X}",
                    expected, found
                )
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for DuelError {
    fn from(err: CodecError) -> Self {
        DuelError::InvalidFrame {
            reason: err.to_string(),
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes one frame.
#[must_use]
pub fn encode(dest: u8, src: u8, cmd: u8, data: u16) -> [u8; FRAME_LEN] {
    Frame::new(dest, src, cmd, data).to_bytes()
}

/// Decodes the frame at the start of `bytes`.
///
/// Bytes past [`FRAME_LEN`] are ignored. A frame that fails any check is never
/// returned.
pub fn decode(bytes: &[u8]) -> CodecResult<Frame> {
    let Some(raw) = bytes.get(..FRAME_LEN) else {
        return Err(CodecError::Truncated { len: bytes.len() });
    };
    if raw[0] != START_MARKER {
        return Err(CodecError::BadStartMarker { found: raw[0] });
    }
    let frame = Frame::with_bytes(raw[1], raw[2], raw[3], raw[4], raw[5]);
    let expected = frame.checksum();
    if expected != raw[6] {
        return Err(CodecError::ChecksumMismatch {
            expected,
            found: raw[6],
        });
    }
    Ok(frame)
}

/// Counters kept by a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Valid frames yielded.
    pub frames_decoded: u64,
    /// Bytes discarded while hunting for a start marker.
    pub bytes_skipped: u64,
    /// Candidate frames rejected by the checksum (false starts included).
    pub checksum_failures: u64,
    /// Bytes dropped because the buffer overflowed.
    pub bytes_overflowed: u64,
}

/// Incremental decoder that resynchronizes on a noisy byte stream.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    buffer: VecDeque<u8>,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied());
        let excess = self.buffer.len().saturating_sub(MAX_BUFFERED_BYTES);
        if excess > 0 {
            self.buffer.drain(..excess);
            self.stats.bytes_overflowed += excess as u64;
            trace!(excess, "frame decoder buffer overflow, oldest bytes dropped");
        }
    }

    /// Returns the next valid frame, or `None` once the buffer holds no complete frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            while let Some(&byte) = self.buffer.front() {
                if byte == START_MARKER {
                    break;
                }
                self.buffer.pop_front();
                self.stats.bytes_skipped += 1;
            }
            if self.buffer.len() < FRAME_LEN {
                return None;
            }

            let mut candidate = [0u8; FRAME_LEN];
            for (slot, byte) in candidate.iter_mut().zip(self.buffer.iter()) {
                *slot = *byte;
            }
            match decode(&candidate) {
                Ok(frame) => {
                    self.buffer.drain(..FRAME_LEN);
                    self.stats.frames_decoded += 1;
                    return Some(frame);
                },
                Err(err) => {
                    trace!(%err, "discarding one byte to resynchronize");
                    self.buffer.pop_front();
                    self.stats.bytes_skipped += 1;
                    self.stats.checksum_failures += 1;
                },
            }
        }
    }

    /// Drains every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Number of bytes waiting for more input.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decoder counters.
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drops any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decodes every valid frame in a complete byte sequence.
#[must_use]
pub fn decode_stream(bytes: &[u8]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    decoder.push(bytes);
    decoder.drain_frames()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_matches_wire_format() {
        let bytes = encode(0x05, 0x00, 0x37, 0x01F4);
        assert_eq!(bytes[0], START_MARKER);
        assert_eq!(&bytes[1..6], &[0x05, 0x00, 0x37, 0x01, 0xF4]);
        assert_eq!(bytes[6], crc8(&bytes[1..6]));
    }

    #[test]
    fn decode_roundtrip_preserves_fields() {
        let frame = decode(&encode(0x00, 0x02, 0x27, 0xFFFF)).unwrap();
        assert_eq!(frame, Frame::new(0x00, 0x02, 0x27, 0xFFFF));
        assert_eq!(frame.data_high(), 0xFF);
        assert_eq!(frame.data_low(), 0xFF);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = encode(0x01, 0x00, 0x24, 0);
        assert_eq!(
            decode(&bytes[..6]),
            Err(CodecError::Truncated { len: 6 })
        );
    }

    #[test]
    fn decode_rejects_bad_start() {
        let mut bytes = encode(0x01, 0x00, 0x24, 0);
        bytes[0] = 0x0B;
        assert_eq!(
            decode(&bytes),
            Err(CodecError::BadStartMarker { found: 0x0B })
        );
    }

    #[test]
    fn decode_rejects_corrupted_crc() {
        let mut bytes = encode(0x01, 0x00, 0x24, 0);
        bytes[6] ^= 0x01;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn stream_with_garbage_yields_both_frames_in_order() {
        let first = encode(0x00, 0x01, 0x26, 120);
        let second = encode(0x00, 0x03, 0x26, 95);
        let mut stream = vec![0x13, 0x77, 0xFF];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&[0x00, 0x42]);
        stream.extend_from_slice(&second);
        stream.push(0x99);

        let frames = decode_stream(&stream);
        assert_eq!(
            frames,
            vec![
                Frame::new(0x00, 0x01, 0x26, 120),
                Frame::new(0x00, 0x03, 0x26, 95)
            ]
        );
    }

    #[test]
    fn false_start_discards_exactly_one_byte() {
        let real = encode(0x00, 0x02, 0x26, 300);
        let mut stream = vec![START_MARKER];
        stream.extend_from_slice(&real);

        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        assert_eq!(decoder.next_frame(), Some(Frame::new(0x00, 0x02, 0x26, 300)));
        assert_eq!(decoder.stats().checksum_failures, 1);
        assert_eq!(decoder.stats().bytes_skipped, 1);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let bytes = encode(0x05, 0x00, 0x34, 0);
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..3]);
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.buffered(), 3);
        decoder.push(&bytes[3..]);
        assert_eq!(decoder.next_frame(), Some(Frame::new(0x05, 0x00, 0x34, 0)));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn overflow_drops_oldest_bytes() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![0x11; MAX_BUFFERED_BYTES + 10]);
        assert_eq!(decoder.buffered(), MAX_BUFFERED_BYTES);
        assert_eq!(decoder.stats().bytes_overflowed, 10);
    }

    #[test]
    fn codec_error_converts_into_duel_error() {
        let err: DuelError = CodecError::Truncated { len: 2 }.into();
        assert!(matches!(err, DuelError::InvalidFrame { .. }));
    }
}

// =============================================================================
// Property-Based Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn garbage() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            any::<u8>().prop_filter("no start marker", |b| *b != START_MARKER),
            0..32,
        )
    }

    proptest! {
        /// Property: decode(encode(..)) returns the original fields
        #[test]
        fn prop_roundtrip(dest in any::<u8>(), src in any::<u8>(), cmd in any::<u8>(), data in any::<u16>()) {
            let frame = decode(&encode(dest, src, cmd, data)).expect("valid frame");
            prop_assert_eq!(frame, Frame::new(dest, src, cmd, data));
        }

        /// Property: any single-bit corruption of an encoded frame is rejected
        #[test]
        fn prop_single_bit_corruption_rejected(
            dest in any::<u8>(), src in any::<u8>(), cmd in any::<u8>(), data in any::<u16>(),
            bit in 0usize..(FRAME_LEN * 8),
        ) {
            let mut bytes = encode(dest, src, cmd, data);
            bytes[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(decode(&bytes).is_err());
        }

        /// Property: [garbage][frame][garbage][frame] yields exactly the two frames in order
        #[test]
        fn prop_resync_between_garbage(
            lead in garbage(), middle in garbage(), tail in garbage(),
            a in any::<(u8, u8, u8, u16)>(), b in any::<(u8, u8, u8, u16)>(),
        ) {
            let mut stream = lead;
            stream.extend_from_slice(&encode(a.0, a.1, a.2, a.3));
            stream.extend_from_slice(&middle);
            stream.extend_from_slice(&encode(b.0, b.1, b.2, b.3));
            stream.extend_from_slice(&tail);

            let frames = decode_stream(&stream);
            prop_assert_eq!(frames, vec![Frame::new(a.0, a.1, a.2, a.3), Frame::new(b.0, b.1, b.2, b.3)]);
        }

        /// Property: arbitrary bytes never panic the decoder, split at any point
        #[test]
        fn prop_arbitrary_bytes_never_panic(bytes in any::<Vec<u8>>(), split in any::<usize>()) {
            let mut decoder = FrameDecoder::new();
            let split = if bytes.is_empty() { 0 } else { split % bytes.len() };
            decoder.push(&bytes[..split]);
            let _ = decoder.drain_frames();
            decoder.push(&bytes[split..]);
            let _ = decoder.drain_frames();
            prop_assert!(decoder.buffered() < FRAME_LEN);
        }
    }
}
