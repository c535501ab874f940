//! Client-side connection state machine.
//!
//! `ClientPhase` models the lifecycle of a client's session with a host,
//! with validated transitions that return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::CouchError;
use crate::protocol::Slot;

// ── ClientPhase ──────────────────────────────────────────────────

/// The current phase of a client's session.
///
/// ```text
///  Disconnected ──► Connecting ──► Active
///       ▲               │            │
///       └───────────────┴────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientPhase {
    /// No session. Initial / terminal state.
    #[default]
    Disconnected,

    /// HELLO sent, waiting for WELCOME.
    Connecting {
        /// HELLOs sent so far.
        attempts: u32,
    },

    /// WELCOME received; input and video are flowing.
    Active {
        slot: Slot,
        /// When the session became active.
        since: Instant,
    },
}

impl std::fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting { .. } => write!(f, "Connecting"),
            Self::Active { slot, .. } => write!(f, "Active ({slot})"),
        }
    }
}

impl ClientPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// The slot assigned by the host, once active.
    pub fn slot(&self) -> Option<Slot> {
        match self {
            Self::Active { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// How long the session has been active. `None` for any other phase.
    pub fn active_duration(&self) -> Option<Duration> {
        match self {
            Self::Active { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), CouchError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting { attempts: 0 };
                Ok(())
            }
            _ => Err(CouchError::ProtocolViolation(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Count one HELLO sent. Returns the attempts made so far.
    ///
    /// Valid in: `Connecting`.
    pub fn record_attempt(&mut self) -> Result<u32, CouchError> {
        match self {
            Self::Connecting { attempts } => {
                *attempts += 1;
                Ok(*attempts)
            }
            _ => Err(CouchError::ProtocolViolation(
                "cannot send hello: not in Connecting state",
            )),
        }
    }

    /// Transition to `Active` on WELCOME.
    ///
    /// Valid from: `Connecting`.
    pub fn activate(&mut self, slot: Slot) -> Result<(), CouchError> {
        match self {
            Self::Connecting { .. } => {
                *self = Self::Active {
                    slot,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(CouchError::ProtocolViolation(
                "cannot activate: not in Connecting state",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Connecting` (handshake failure), `Active`.
    pub fn disconnect(&mut self) -> Result<(), CouchError> {
        match self {
            Self::Connecting { .. } | Self::Active { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            Self::Disconnected => Err(CouchError::ProtocolViolation(
                "cannot disconnect: already Disconnected",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
