//! Domain-specific error types for the couch protocol.
//!
//! All fallible operations return `Result<T, CouchError>`.
//! Per-datagram problems surface as [`DecodeError`] so receive loops can
//! drop the packet and keep going.

use thiserror::Error;

use crate::message::MessageType;

/// The canonical error type for the couch transport.
#[derive(Debug, Error)]
pub enum CouchError {
    // ── Wire Errors ──────────────────────────────────────────────
    /// A datagram could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The payload exceeds what the wire format can carry.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message arrived that is not valid in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Session Errors ───────────────────────────────────────────
    /// Every controller slot on the host is taken.
    #[error("server full")]
    ServerFull,

    /// No WELCOME arrived within the retry budget.
    #[error("handshake failed: no response after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    // ── Connection Errors ────────────────────────────────────────
    /// The UDP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is out of range or unparsable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Typed error for a single malformed datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header or payload layout requires.
    #[error("truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// The header length field disagrees with the bytes that followed.
    #[error("length mismatch: header says {declared}, datagram carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The type byte does not name any known message.
    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// The payload is the wrong shape for its message type.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        kind: MessageType,
        reason: &'static str,
    },
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CouchError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CouchError::ChannelClosed
    }
}
