//! Length-prefixed, typed message framing over a byte stream.
//!
//! Every message between peers after the handshake is:
//!
//! ```text
//!   u32 LE  payload_len
//!   u16 LE  message_type
//!   opaque  payload[payload_len]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result, ResultWrappedExt};

/// Size of the frame header, in bytes: 4 for the length, 2 for the type.
pub const HEADER_LEN: usize = 6;

/// The kind of a framed message.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u16)]
pub enum MessageType {
    /// Downstream propagation of an update, from head towards tail.
    ForwardPass = 1,
    /// Upstream acknowledgement of an update, from tail towards head.
    BackwardPass = 2,
}

impl MessageType {
    fn from_u16(raw: u16) -> Result<Self> {
        match raw {
            1 => Ok(MessageType::ForwardPass),
            2 => Ok(MessageType::BackwardPass),
            _ => Err(Error::wrapped(
                ErrorKind::Framing,
                format!("unknown message type {}", raw),
            )),
        }
    }
}

/// The payload carried by both `ForwardPass` and `BackwardPass` frames.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Update {
    pub txn_id: u64,
    pub key: String,
    pub value: String,
}

/// Serializes `message_type` and `payload` into one wire frame.
pub fn encode(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(message_type as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Bincode-encodes an `Update` into a frame's payload bytes (no header).
/// This is what `PeerConnection::send` expects as its `payload` argument.
pub fn serialize_update(update: &Update) -> Result<Vec<u8>> {
    bincode::serialize(update).wrapped(ErrorKind::Framing)
}

/// Serializes an `Update` as a full wire frame (header + payload).
pub fn encode_update(message_type: MessageType, update: &Update) -> Result<Vec<u8>> {
    let payload = serialize_update(update)?;
    Ok(encode(message_type, &payload))
}

/// Decodes an `Update` from a frame's raw payload bytes.
pub fn decode_update(payload: &[u8]) -> Result<Update> {
    bincode::deserialize(payload).wrapped(ErrorKind::Framing)
}

/// Accumulates bytes arriving from a peer and extracts complete frames.
///
/// Handles arbitrary chunk boundaries: a single `push` may deliver a
/// fragment of a frame, exactly one frame, or several frames back to
/// back. Call `try_decode` repeatedly after every `push` until it
/// returns `Ok(None)`.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates a decoder pre-seeded with bytes already read off the wire
    /// (e.g. the excess left over from the identity handshake, per
    /// spec.md's handshake-buffering requirement).
    pub fn with_initial_buffer(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extracts one complete frame from the buffer, if available.
    ///
    /// Returns `Ok(None)` when the buffer doesn't yet hold a full frame.
    /// Returns `Err` on an unknown message type -- the caller should
    /// tear down the connection, per spec.md's framing error policy.
    pub fn try_decode(&mut self) -> Result<Option<(MessageType, Vec<u8>)>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let payload_len = u32::from_le_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
        let raw_type = u16::from_le_bytes(self.buffer[4..6].try_into().unwrap());
        let total_len = HEADER_LEN + payload_len;

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let message_type = MessageType::from_u16(raw_type)?;
        let payload = self.buffer[HEADER_LEN..total_len].to_vec();
        self.buffer.drain(0..total_len);

        Ok(Some((message_type, payload)))
    }
}
