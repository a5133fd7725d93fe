//! frelay-core: framing core for the frelay TCP message relay.
//!
//! Provides the envelope type, the length-prefixed frame codec, per-connection
//! stream reassembly, the error taxonomy, and the application message schema.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod reassembler;

// Re-export commonly used items at crate root.
pub use codec::{Decoded, FrameCodec, DEFAULT_MAX_FRAME_LEN, HEADER_LEN};
pub use envelope::Envelope;
pub use error::{RelayError, RelayResult};
pub use messages::{decode_payload, encode_payload, ChatRequest, ChatResult, Command};
pub use reassembler::{FrameEvent, Reassembler};
