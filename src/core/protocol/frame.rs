//! Wire frame codec
//! Every request and notification is `55 <seq> <cmd> <payload..> AA`.
//! Response handlers address fields by their token index on the wire, so
//! index 3 is the first payload byte.

use std::fmt;
use std::ops::RangeInclusive;

use crate::error::ProtocolError;

/// Start marker of every frame.
pub const FRAME_START: u8 = 0x55;
/// End marker of every frame.
pub const FRAME_END: u8 = 0xAA;
/// Largest payload a request may carry.
pub const MAX_PAYLOAD_LEN: usize = 20;
/// Wire token index of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 3;

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            command,
            payload,
        }
    }

    /// Serializes the frame with its start and end markers.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.sequence, self.command, &self.payload)
    }

    /// Parses raw notification bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < PAYLOAD_OFFSET + 1 {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame too short ({} bytes)",
                bytes.len()
            )));
        }
        if bytes[0] != FRAME_START {
            return Err(ProtocolError::MalformedFrame(format!(
                "bad start marker 0x{:02x}",
                bytes[0]
            )));
        }
        let last = bytes[bytes.len() - 1];
        if last != FRAME_END {
            return Err(ProtocolError::MalformedFrame(format!(
                "bad end marker 0x{last:02x}"
            )));
        }

        Ok(Self {
            sequence: bytes[1],
            command: bytes[2],
            payload: bytes[PAYLOAD_OFFSET..bytes.len() - 1].to_vec(),
        })
    }

    /// Returns the byte at a wire token index, failing closed when the
    /// payload is shorter than the handler expects.
    pub fn token(&self, index: usize) -> Result<u8, ProtocolError> {
        index
            .checked_sub(PAYLOAD_OFFSET)
            .and_then(|i| self.payload.get(i).copied())
            .ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "command 0x{:02x}: token {} missing, payload has {} bytes",
                    self.command,
                    index,
                    self.payload.len()
                ))
            })
    }

    /// Checks that every token up to and including `index` is present.
    pub fn require_tokens(&self, index: usize) -> Result<(), ProtocolError> {
        self.token(index).map(|_| ())
    }

    /// Reads a little-endian unsigned integer spanning the given token range.
    pub fn le_value(&self, tokens: RangeInclusive<usize>) -> Result<u32, ProtocolError> {
        let (start, end) = (*tokens.start(), *tokens.end());
        if end < start || end - start >= 4 {
            return Err(ProtocolError::MalformedFrame(format!(
                "token range {start}..={end} does not fit in u32"
            )));
        }
        let mut value = 0u32;
        for (shift, index) in tokens.enumerate() {
            value |= u32::from(self.token(index)?) << (8 * shift);
        }
        Ok(value)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x}",
            FRAME_START, self.sequence, self.command
        )?;
        for byte in &self.payload {
            write!(f, " {byte:02x}")?;
        }
        write!(f, " {FRAME_END:02x}")
    }
}

/// Builds `55 ‖ seq ‖ command ‖ payload ‖ AA`. Payloads longer than
/// [`MAX_PAYLOAD_LEN`] are refused.
pub fn encode(sequence: u8, command: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidArgument(format!(
            "command 0x{command:02x}: payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.push(FRAME_START);
    bytes.push(sequence);
    bytes.push(command);
    bytes.extend_from_slice(payload);
    bytes.push(FRAME_END);
    Ok(bytes)
}
