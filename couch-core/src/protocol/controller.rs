//! Controller input records.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[CONTROLLER_STATE]────────────────► Host   (fixed cadence)
//!   Payload: ControllerState (14 bytes)
//!
//! Host   ──[CONTROLLER_ASSIGN]───────────────► Client
//!   Payload: slot (1 byte)
//! ```
//!
//! ## ControllerState layout (big-endian)
//! ```text
//! buttons:        u16  (2)
//! left_x:         i16  (2)
//! left_y:         i16  (2)
//! right_x:        i16  (2)
//! right_y:        i16  (2)
//! left_trigger:   u8   (1)
//! right_trigger:  u8   (1)
//! reserved:       u16  (2)   zero on send, ignored on receive
//! ```
//!
//! The button bit order is a compatibility contract with every other
//! implementation of the protocol and must not change.

use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::message::MessageType;
use crate::packet::Message;
use crate::sequence::Seq24;

/// Highest number of controller slots the protocol supports.
pub const MAX_SLOTS: usize = 4;

// ── Buttons ──────────────────────────────────────────────────────

bitflags! {
    /// Xbox-style button bitmask, bit positions 0–15.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const LEFT_SHOULDER = 1 << 4;
        const RIGHT_SHOULDER = 1 << 5;
        const BACK = 1 << 6;
        const START = 1 << 7;
        const LEFT_THUMB = 1 << 8;
        const RIGHT_THUMB = 1 << 9;
        const DPAD_UP = 1 << 10;
        const DPAD_DOWN = 1 << 11;
        const DPAD_LEFT = 1 << 12;
        const DPAD_RIGHT = 1 << 13;
        // Bits 14 and 15 are reserved. Unknown bits survive a decode so a
        // newer peer's extensions pass through untouched.
        const _ = !0;
    }
}

// ── ControllerState ──────────────────────────────────────────────

/// A complete controller snapshot. Each record supersedes the previous
/// one for its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControllerState {
    pub buttons: Buttons,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl ControllerState {
    /// Encoded size on the wire.
    pub const SIZE: usize = 14;

    /// Sticks centred, triggers released, no buttons held.
    pub const NEUTRAL: ControllerState = ControllerState {
        buttons: Buttons::empty(),
        left_x: 0,
        left_y: 0,
        right_x: 0,
        right_y: 0,
        left_trigger: 0,
        right_trigger: 0,
    };

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }

    pub fn is_pressed(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }

    pub fn with_buttons(mut self, buttons: Buttons) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut dst = &mut buf[..];
        dst.put_u16(self.buttons.bits());
        dst.put_i16(self.left_x);
        dst.put_i16(self.left_y);
        dst.put_i16(self.right_x);
        dst.put_i16(self.right_y);
        dst.put_u8(self.left_trigger);
        dst.put_u8(self.right_trigger);
        dst.put_u16(0);
        buf
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::SIZE {
            return Err(DecodeError::InvalidPayload {
                kind: MessageType::ControllerState,
                reason: "controller state must be exactly 14 bytes",
            });
        }
        Ok(Self {
            buttons: Buttons::from_bits_retain(data.get_u16()),
            left_x: data.get_i16(),
            left_y: data.get_i16(),
            right_x: data.get_i16(),
            right_y: data.get_i16(),
            left_trigger: data.get_u8(),
            right_trigger: data.get_u8(),
        })
    }

    /// Build a CONTROLLER_STATE message.
    pub fn into_message(self, sequence: Seq24) -> Message {
        Message::with_payload(
            MessageType::ControllerState,
            sequence,
            Bytes::copy_from_slice(&self.to_bytes()),
        )
    }
}

// ── Slot ─────────────────────────────────────────────────────────

/// Index of the virtual controller a client drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u8);

impl Slot {
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Decode a one-byte slot payload (WELCOME and CONTROLLER_ASSIGN).
    pub fn from_payload(kind: MessageType, data: &[u8]) -> Result<Self, DecodeError> {
        match data {
            [slot] if (*slot as usize) < MAX_SLOTS => Ok(Self(*slot)),
            [_] => Err(DecodeError::InvalidPayload {
                kind,
                reason: "slot out of range",
            }),
            _ => Err(DecodeError::InvalidPayload {
                kind,
                reason: "slot payload must be exactly 1 byte",
            }),
        }
    }

    /// Build a WELCOME or CONTROLLER_ASSIGN message carrying this slot.
    pub fn into_message(self, kind: MessageType, sequence: Seq24) -> Message {
        let mut payload = BytesMut::with_capacity(1);
        payload.put_u8(self.0);
        Message::with_payload(kind, sequence, payload.freeze())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}
