//! Handshake, keepalive and teardown payloads.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[HELLO]──────────────────────────► Host
//!   Payload: video_port u16 (0 = stream to the sending address)
//!
//! Host   ──[WELCOME]────────────────────────► Client
//!   Payload: slot u8
//!
//! Client ──[PING]───────────────────────────► Host     (every keepalive interval)
//! Host   ──[PONG]───────────────────────────► Client   (same sequence, empty)
//!
//! Either ──[DISCONNECT]─────────────────────► Other
//!   Payload: reason u8 (optional, empty = requested)
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::message::MessageType;
use crate::packet::Message;
use crate::sequence::Seq24;

// ── Hello ────────────────────────────────────────────────────────

/// Session request sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hello {
    /// UDP port the client receives video on, or 0 to receive it on the
    /// socket that sent this HELLO.
    pub video_port: u16,
}

impl Hello {
    pub const SIZE: usize = 2;

    pub fn new(video_port: u16) -> Self {
        Self { video_port }
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, DecodeError> {
        match data.len() {
            // A bare HELLO from an older client.
            0 => Ok(Self::default()),
            Self::SIZE => Ok(Self {
                video_port: data.get_u16(),
            }),
            _ => Err(DecodeError::InvalidPayload {
                kind: MessageType::Hello,
                reason: "hello payload must be empty or 2 bytes",
            }),
        }
    }

    pub fn into_message(self, sequence: Seq24) -> Message {
        let mut payload = BytesMut::with_capacity(Self::SIZE);
        payload.put_u16(self.video_port);
        Message::with_payload(MessageType::Hello, sequence, payload.freeze())
    }
}

// ── DisconnectReason ─────────────────────────────────────────────

/// Why a session ended, carried in DISCONNECT and surfaced in logs.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The peer asked to leave.
    Requested = 0,
    /// The host has no free controller slot.
    ServerFull = 1,
    /// No traffic within the inactivity window.
    Timeout = 2,
    /// The host is shutting down.
    Shutdown = 3,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DisconnectReason::Requested),
            1 => Ok(DisconnectReason::ServerFull),
            2 => Ok(DisconnectReason::Timeout),
            3 => Ok(DisconnectReason::Shutdown),
            _ => Err(DecodeError::InvalidPayload {
                kind: MessageType::Disconnect,
                reason: "unknown disconnect reason",
            }),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::ServerFull => "server full",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Shutdown => "host shutdown",
        };
        f.write_str(text)
    }
}

impl DisconnectReason {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        match data {
            [] => Ok(DisconnectReason::Requested),
            [code] => DisconnectReason::try_from(*code),
            _ => Err(DecodeError::InvalidPayload {
                kind: MessageType::Disconnect,
                reason: "disconnect payload must be empty or 1 byte",
            }),
        }
    }

    pub fn into_message(self, sequence: Seq24) -> Message {
        Message::with_payload(
            MessageType::Disconnect,
            sequence,
            Bytes::copy_from_slice(&[self as u8]),
        )
    }
}
