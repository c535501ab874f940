//! Message type discriminants.
//!
//! Uses a proper enum with `TryFrom`, so an unknown value is an error, never a panic.

use crate::error::DecodeError;
use std::fmt;

// ── MessageType ──────────────────────────────────────────────────

/// Every message understood by the couch protocol.
///
/// Organized by category:
/// - `0..=9`   : control (handshake, keepalive, teardown)
/// - `10..=19` : controller input
/// - `20..=29` : video stream
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // ── Control ──────────────────────────────────────────────────
    /// Client → host: request a session.
    Hello = 0,
    /// Host → client: session accepted, carries the slot.
    Welcome = 1,
    /// Keep-alive request.
    Ping = 2,
    /// Keep-alive reply, echoes the PING sequence.
    Pong = 3,
    /// Either side: session is over.
    Disconnect = 4,

    // ── Controller ───────────────────────────────────────────────
    /// Client → host: full controller snapshot.
    ControllerState = 10,
    /// Host → client: assigned controller slot.
    ControllerAssign = 11,

    // ── Video ────────────────────────────────────────────────────
    /// Host → client: one fragment of an encoded frame.
    VideoFrame = 20,
    /// Host → client: stream parameters.
    VideoConfig = 21,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Hello),
            1 => Ok(MessageType::Welcome),
            2 => Ok(MessageType::Ping),
            3 => Ok(MessageType::Pong),
            4 => Ok(MessageType::Disconnect),

            10 => Ok(MessageType::ControllerState),
            11 => Ok(MessageType::ControllerAssign),

            20 => Ok(MessageType::VideoFrame),
            21 => Ok(MessageType::VideoConfig),

            _ => Err(DecodeError::UnknownType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Hello => "HELLO",
            MessageType::Welcome => "WELCOME",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::ControllerState => "CONTROLLER_STATE",
            MessageType::ControllerAssign => "CONTROLLER_ASSIGN",
            MessageType::VideoFrame => "VIDEO_FRAME",
            MessageType::VideoConfig => "VIDEO_CONFIG",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_roundtrip() {
        let all = [
            MessageType::Hello,
            MessageType::Welcome,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Disconnect,
            MessageType::ControllerState,
            MessageType::ControllerAssign,
            MessageType::VideoFrame,
            MessageType::VideoConfig,
        ];
        for ty in all {
            assert_eq!(MessageType::try_from(ty as u8).unwrap(), ty);
        }
    }

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(MessageType::Hello as u8, 0);
        assert_eq!(MessageType::Disconnect as u8, 4);
        assert_eq!(MessageType::ControllerState as u8, 10);
        assert_eq!(MessageType::VideoConfig as u8, 21);
    }

    #[test]
    fn message_type_invalid() {
        assert_eq!(MessageType::try_from(5), Err(DecodeError::UnknownType(5)));
        assert!(MessageType::try_from(0xFF).is_err());
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(MessageType::ControllerState.to_string(), "CONTROLLER_STATE");
    }
}
