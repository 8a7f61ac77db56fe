//! Length-prefixed framing for the per-session socket.
//!
//! ```text
//! [1 byte: message type][4 bytes: payload length, big-endian][payload]
//! ```
//!
//! [`MessageParser`] accumulates bytes from one connection and yields a frame
//! only once its whole payload has arrived.

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 5;
pub const DEFAULT_MAX_PAYLOAD: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    StdinData = 0x01,
    ControlCmd = 0x02,
    StatusUpdate = 0x03,
    Heartbeat = 0x04,
    Error = 0x05,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::StdinData => "stdin",
            MessageType::ControlCmd => "control",
            MessageType::StatusUpdate => "status",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Error => "error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(MessageType::StdinData),
            0x02 => Ok(MessageType::ControlCmd),
            0x03 => Ok(MessageType::StatusUpdate),
            0x04 => Ok(MessageType::Heartbeat),
            0x05 => Ok(MessageType::Error),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

pub fn frame_message(kind: MessageType, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(kind as u8);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[derive(Debug)]
pub struct MessageParser {
    buffer: Vec<u8>,
    max_payload: usize,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl MessageParser {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_payload,
        }
    }

    pub fn add_data(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete frame, if one is buffered.
    ///
    /// The header is validated as soon as it is present, so an oversized or
    /// unknown frame is rejected without waiting for its payload.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = MessageType::try_from(self.buffer[0])?;
        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }

        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buffer.drain(..HEADER_LEN + len);
        Ok(Some(RawFrame { kind, payload }))
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
