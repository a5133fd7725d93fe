//! Per-connection stream reassembly.
//!
//! Accumulates raw bytes from a stream transport and yields complete frames
//! in arrival order. Consumed bytes are trimmed from the front once per feed.

use crate::codec::{Decoded, FrameCodec};
use crate::envelope::Envelope;
use tracing::trace;

/// One event produced while draining the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame, ready for dispatch.
    Frame(Envelope),
    /// A frame whose bytes were skipped because they could not be trusted.
    Malformed { reason: String },
}

/// Streaming frame extractor for a single connection.
#[derive(Debug, Default)]
pub struct Reassembler {
    codec: FrameCodec,
    buffer: Vec<u8>,
    /// Bytes of an oversized frame still to be skipped as they arrive.
    discard: usize,
}

impl Reassembler {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: Vec::new(),
            discard: 0,
        }
    }

    /// Feed raw bytes and return every event they complete, in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        let mut data = data;
        if self.discard > 0 {
            let skip = self.discard.min(data.len());
            self.discard -= skip;
            data = &data[skip..];
        }
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        let mut offset = 0;
        loop {
            match self.codec.decode(&self.buffer[offset..]) {
                Decoded::Incomplete => break,
                Decoded::Frame {
                    consumed,
                    command_id,
                    payload,
                } => {
                    offset += consumed;
                    events.push(FrameEvent::Frame(Envelope {
                        command_id,
                        payload,
                    }));
                }
                Decoded::Malformed { consumed, reason } => {
                    let available = self.buffer.len() - offset;
                    if consumed > available {
                        self.discard = consumed - available;
                        offset = self.buffer.len();
                    } else {
                        offset += consumed;
                    }
                    events.push(FrameEvent::Malformed { reason });
                }
            }
        }

        self.buffer.drain(..offset);
        trace!(
            events = events.len(),
            pending = self.buffer.len(),
            "reassembler drained"
        );
        events
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discard = 0;
    }

    /// Number of bytes buffered but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
