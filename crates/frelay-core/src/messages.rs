//! Application message schema carried inside envelope payloads.

use crate::error::RelayResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Cursor;

/// Numeric command ids shared by server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Command {
    /// Client asks the server to end its session.
    None = 0,
    /// Client sends text to another session.
    Chat = 1,
    /// Server delivers text to a client.
    Result = 2,
}

impl From<Command> for i32 {
    fn from(c: Command) -> i32 {
        c as i32
    }
}

impl TryFrom<i32> for Command {
    type Error = String;
    fn try_from(v: i32) -> Result<Self, String> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Chat),
            2 => Ok(Self::Result),
            _ => Err(format!("unknown command: {v}")),
        }
    }
}

/// `Chat` payload: deliver `text` to session `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub target_id: u64,
    pub text: String,
}

/// `Result` payload: text pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResult {
    pub text: String,
}

/// Serialize an application payload to CBOR.
pub fn encode_payload<T: Serialize>(value: &T) -> RelayResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Deserialize an application payload from CBOR.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> RelayResult<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}
