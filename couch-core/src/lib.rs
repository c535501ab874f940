//! # couch-core
//!
//! Session and streaming transport for remote couch co-op.
//!
//! This crate contains:
//! - **Wire codec**: `MessageHeader`, `Message`, `MessageType` and the typed
//!   payloads in [`protocol`]
//! - **Sequences**: 24-bit wrapping `Seq24` and wrap-safe frame id ordering
//! - **Fragments**: `Fragmenter` and `FrameAssembler` for frames larger than
//!   one datagram
//! - **State**: the host's `SessionTable` and the client's `ClientPhase`
//! - **Network**: `HostTransport` and `ClientTransport` over UDP
//! - **Sink**: `VirtualControllerSink`, where controller state leaves the crate
//! - **Error**: `CouchError` and `DecodeError`, `thiserror`-based

pub mod error;
pub mod fragment;
pub mod header;
pub mod message;
pub mod network;
pub mod packet;
pub mod protocol;
pub mod sequence;
pub mod sink;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{CouchError, DecodeError};
pub use fragment::{AssemblerStats, DEFAULT_MTU, EncodedFrame, FrameAssembler, Fragmenter};
pub use header::{HEADER_SIZE, MessageHeader};
pub use message::MessageType;
pub use network::{
    ClientExit, ClientSession, ClientStats, ClientTransport, ClientTransportConfig, HostAddrs,
    HostHandle, HostStats, HostTransport, HostTransportConfig,
};
pub use packet::{MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, Message};
pub use protocol::{
    Buttons, ControllerState, DisconnectReason, Hello, MAX_SLOTS, Slot, VideoConfig, VideoFragment,
};
pub use sequence::Seq24;
pub use sink::{NullSink, VirtualControllerSink};
pub use state::{ClientPhase, ClosedSession, InputOutcome, SessionInfo, SessionState, SessionTable};
