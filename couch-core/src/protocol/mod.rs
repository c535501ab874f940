//! Typed payload definitions for couch messages.
//!
//! Each sub-module owns the fixed binary layout of one protocol domain
//! (handshake/keepalive, controller input, video). Payloads are carried
//! inside [`Message`] bodies.
//!
//! [`Message`]: crate::packet::Message

pub mod control;
pub mod controller;
pub mod video;

// Re-export the most commonly used types at the protocol level.
pub use control::{DisconnectReason, Hello};
pub use controller::{Buttons, ControllerState, MAX_SLOTS, Slot};
pub use video::{VideoConfig, VideoFragment};
