//! Length-prefixed envelope framing for the relay byte stream.
//!
//! Wire format: `[4-byte big-endian length][CBOR envelope]`. The length
//! counts only the envelope bytes, never the prefix itself.

use crate::envelope::{write_body, Envelope};
use crate::error::{RelayError, RelayResult};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default bound on the envelope length (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1_048_576;

/// Outcome of a single decode attempt against the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet; keep buffering.
    Incomplete,
    /// A complete, well-formed frame occupying `consumed` bytes.
    Frame {
        consumed: usize,
        command_id: i32,
        payload: Vec<u8>,
    },
    /// The frame occupies `consumed` bytes but cannot be trusted.
    ///
    /// For an oversized declared length `consumed` may exceed the bytes
    /// currently available; the caller skips the remainder as it arrives.
    Malformed { consumed: usize, reason: String },
}

/// Stateless encoder/decoder for length-prefixed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    /// Create a codec bounding envelope length at `max_frame_len` bytes.
    ///
    /// The bound is clamped to what a `u32` length prefix can express.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Encode a command id and payload into a complete frame.
    ///
    /// The body is serialized directly behind a reserved length prefix.
    pub fn encode(&self, command_id: i32, payload: &[u8]) -> RelayResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 16);
        frame.extend_from_slice(&[0; HEADER_LEN]);
        write_body(command_id, payload, &mut frame)?;

        let len = frame.len() - HEADER_LEN;
        if len > self.max_frame_len {
            return Err(RelayError::PayloadTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        frame[..HEADER_LEN].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(frame)
    }

    /// Encode an existing envelope into a complete frame.
    pub fn encode_envelope(&self, envelope: &Envelope) -> RelayResult<Vec<u8>> {
        self.encode(envelope.command_id, &envelope.payload)
    }

    /// Try to decode one frame from the front of `buf`.
    pub fn decode(&self, buf: &[u8]) -> Decoded {
        if buf.len() < HEADER_LEN {
            return Decoded::Incomplete;
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let consumed = HEADER_LEN.saturating_add(len);

        if len > self.max_frame_len {
            return Decoded::Malformed {
                consumed,
                reason: format!(
                    "declared frame length {len} exceeds max {}",
                    self.max_frame_len
                ),
            };
        }

        if buf.len() < consumed {
            return Decoded::Incomplete;
        }

        match Envelope::from_cbor(&buf[HEADER_LEN..consumed]) {
            Ok(envelope) => Decoded::Frame {
                consumed,
                command_id: envelope.command_id,
                payload: envelope.payload,
            },
            Err(reason) => Decoded::Malformed { consumed, reason },
        }
    }
}
