//! Fixed 8-byte message header.
//!
//! ```text
//! type:      u8       (1)
//! sequence:  u24 BE   (3)
//! length:    u32 BE   (4)
//! ```

use crate::error::DecodeError;
use crate::message::MessageType;
use crate::sequence::Seq24;

pub const HEADER_SIZE: usize = 8;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sequence: Seq24,
    pub payload_length: u32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, sequence: Seq24, payload_length: u32) -> Self {
        Self {
            message_type,
            sequence,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut buf: HeaderBytes = [0; HEADER_SIZE];
        let seq = self.sequence.get().to_be_bytes();
        buf[0] = self.message_type as u8;
        buf[1..4].copy_from_slice(&seq[1..4]);
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Parse the header at the start of `bytes`.
    ///
    /// Only the header itself is validated here; checking the length field
    /// against the datagram is left to [`Message::decode`](crate::Message::decode).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some(raw) = bytes.first_chunk::<HEADER_SIZE>() else {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE,
                actual: bytes.len(),
            });
        };

        let message_type = MessageType::try_from(raw[0])?;
        let sequence = Seq24::new(u32::from_be_bytes([0, raw[1], raw[2], raw[3]]));
        let payload_length = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);

        Ok(Self {
            message_type,
            sequence,
            payload_length,
        })
    }
}
