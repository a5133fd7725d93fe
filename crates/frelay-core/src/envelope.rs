//! The logical unit exchanged between peers: a command id plus opaque payload.
//!
//! Serialized as a CBOR map with integer keys:
//! `{ 0: command_id (int32), 1: payload (bytes) }`. Unknown integer keys are
//! ignored so newer peers can add fields.

use crate::error::RelayResult;
use ciborium::Value;

const KEY_COMMAND_ID: i64 = 0;
const KEY_PAYLOAD: i64 = 1;

/// A command id and its opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command_id: i32,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(command_id: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command_id,
            payload: payload.into(),
        }
    }

    /// Serialize the envelope body (without the length prefix).
    pub fn to_cbor(&self) -> RelayResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.payload.len() + 16);
        write_body(self.command_id, &self.payload, &mut buf)?;
        Ok(buf)
    }

    /// Parse an envelope body. The error string describes the schema violation.
    pub fn from_cbor(data: &[u8]) -> Result<Self, String> {
        let mut reader = data;
        let value: Value = ciborium::from_reader(&mut reader).map_err(|e| e.to_string())?;
        if !reader.is_empty() {
            return Err(format!("{} trailing bytes after envelope", reader.len()));
        }

        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err("envelope is not a map".to_string()),
        };

        let mut command_id = None;
        let mut payload = None;
        for (key, value) in entries {
            let key = match key {
                Value::Integer(i) => i128::from(i),
                _ => return Err("envelope key is not an integer".to_string()),
            };
            match (key, value) {
                (k, Value::Integer(i)) if k == KEY_COMMAND_ID as i128 => {
                    let id = i32::try_from(i)
                        .map_err(|_| format!("command id {} out of range", i128::from(i)))?;
                    command_id = Some(id);
                }
                (k, Value::Bytes(bytes)) if k == KEY_PAYLOAD as i128 => {
                    payload = Some(bytes);
                }
                (k, _) if k == KEY_COMMAND_ID as i128 || k == KEY_PAYLOAD as i128 => {
                    return Err(format!("envelope field {k} has the wrong type"));
                }
                _ => {}
            }
        }

        match (command_id, payload) {
            (Some(command_id), Some(payload)) => Ok(Self {
                command_id,
                payload,
            }),
            (None, _) => Err("envelope is missing the command id".to_string()),
            (_, None) => Err("envelope is missing the payload".to_string()),
        }
    }
}

/// Append the CBOR body for `(command_id, payload)` to `out`.
pub(crate) fn write_body(command_id: i32, payload: &[u8], out: &mut Vec<u8>) -> RelayResult<()> {
    let value = Value::Map(vec![
        (
            Value::Integer(KEY_COMMAND_ID.into()),
            Value::Integer(command_id.into()),
        ),
        (
            Value::Integer(KEY_PAYLOAD.into()),
            Value::Bytes(payload.to_vec()),
        ),
    ]);
    ciborium::into_writer(&value, out)?;
    Ok(())
}
