//! The on-wire message: fixed header plus opaque payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CouchError, DecodeError};
use crate::header::{HEADER_SIZE, MessageHeader};
use crate::message::MessageType;
use crate::sequence::Seq24;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest message payload that still fits in one datagram.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// A decoded couch message.
///
/// The length field is never stored: it is derived from `payload` on encode
/// and checked against the datagram on decode, so `length == len(payload)`
/// holds for every value of this type.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    sequence: Seq24,
    payload: Bytes,
}

impl Message {
    /// Build a message, rejecting payloads that cannot fit in a datagram.
    pub fn new(
        message_type: MessageType,
        sequence: Seq24,
        payload: Bytes,
    ) -> Result<Self, CouchError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CouchError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self::with_payload(message_type, sequence, payload))
    }

    /// A message with no payload (PING, PONG, bare DISCONNECT).
    pub fn empty(message_type: MessageType, sequence: Seq24) -> Self {
        Self::with_payload(message_type, sequence, Bytes::new())
    }

    /// Internal constructor for payload builders whose size is bounded by
    /// construction.
    pub(crate) fn with_payload(message_type: MessageType, sequence: Seq24, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self {
            message_type,
            sequence,
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn sequence(&self) -> Seq24 {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn header(&self) -> MessageHeader {
        MessageHeader::new(self.message_type, self.sequence, self.payload.len() as u32)
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut dst);
        dst.freeze()
    }

    /// Append the encoded message to `dst`, for callers reusing a buffer.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header().to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Decode exactly one message from one datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let header = MessageHeader::from_bytes(datagram)?;

        let declared = header.payload_length as usize;
        let actual = datagram.len() - HEADER_SIZE;
        if declared != actual {
            return Err(DecodeError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            message_type: header.message_type,
            sequence: header.sequence,
            payload: Bytes::copy_from_slice(&datagram[HEADER_SIZE..]),
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.message_type)
            .field("sequence", &self.sequence)
            .field("length", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        Buttons, ControllerState, DisconnectReason, Hello, Slot, VideoConfig, VideoFragment,
    };

    fn roundtrip(msg: &Message) -> Message {
        Message::decode(&msg.encode()).unwrap()
    }

    #[test]
    fn every_message_type_roundtrips() {
        let state = ControllerState::NEUTRAL.with_buttons(Buttons::A | Buttons::START);
        let fragment = VideoFragment {
            frame_id: 77,
            fragment_index: 0,
            fragment_count: 2,
            data: Bytes::from_static(&[1, 2, 3, 4, 5]),
        };
        let messages = [
            Hello::new(7778).into_message(Seq24::new(1)),
            Slot::new(2).into_message(MessageType::Welcome, Seq24::ZERO),
            Message::empty(MessageType::Ping, Seq24::new(40)),
            Message::empty(MessageType::Pong, Seq24::new(40)),
            DisconnectReason::Shutdown.into_message(Seq24::ZERO),
            state.into_message(Seq24::MAX),
            Slot::new(2).into_message(MessageType::ControllerAssign, Seq24::ZERO),
            fragment.to_message(Seq24::new(123_456)),
            VideoConfig::default().into_message(Seq24::ZERO),
        ];
        for msg in &messages {
            assert_eq!(&roundtrip(msg), msg);
        }

        let decoded = roundtrip(&messages[5]);
        assert_eq!(ControllerState::from_bytes(decoded.payload()).unwrap(), state);
    }

    #[test]
    fn length_field_shorter_than_datagram() {
        let mut bytes = Message::empty(MessageType::Ping, Seq24::ZERO)
            .encode()
            .to_vec();
        bytes.push(0xEE);
        assert_eq!(
            Message::decode(&bytes),
            Err(DecodeError::LengthMismatch {
                declared: 0,
                actual: 1
            })
        );
    }

    #[test]
    fn length_field_longer_than_datagram() {
        let msg = ControllerState::NEUTRAL.into_message(Seq24::ZERO);
        let bytes = msg.encode();
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(
            Message::decode(cut),
            Err(DecodeError::LengthMismatch {
                declared: 14,
                actual: 11
            })
        );
    }

    #[test]
    fn unknown_type_and_truncation() {
        assert_eq!(
            Message::decode(&[0xFE, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::UnknownType(0xFE))
        );
        assert!(matches!(
            Message::decode(&[1, 2, 3]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            Message::new(MessageType::VideoFrame, Seq24::ZERO, big),
            Err(CouchError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn encode_into_appends() {
        let mut buf = BytesMut::new();
        Message::empty(MessageType::Ping, Seq24::new(1)).encode_into(&mut buf);
        Message::empty(MessageType::Pong, Seq24::new(1)).encode_into(&mut buf);
        assert_eq!(buf.len(), 2 * HEADER_SIZE);
        assert_eq!(buf[HEADER_SIZE], MessageType::Pong as u8);
    }
}
