//! Host-side session table.
//!
//! The table is the single authority for which client drives which
//! controller slot and for whether that client is still alive. Every
//! operation is O(slots), and the host keeps the table behind one
//! `std::sync::Mutex` that is never held across an `.await`.
//!
//! The table owns the [`VirtualControllerSink`] and calls it while the
//! lock is held: an input update can never race the `zero` of the session
//! that is being closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::CouchError;
use crate::protocol::{ControllerState, DisconnectReason, MAX_SLOTS, Slot};
use crate::sequence::Seq24;
use crate::sink::VirtualControllerSink;

// ── Session ──────────────────────────────────────────────────────

/// Lifecycle of one host-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// HELLO accepted, WELCOME not yet sent.
    Connecting,
    /// Receiving input and video.
    Active,
    /// Closed; the slot has been zeroed and freed.
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Active => write!(f, "Active"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    address: SocketAddr,
    video_address: SocketAddr,
    slot: Slot,
    state: SessionState,
    connected_at: Instant,
    last_seen: Instant,
    rx_input_seq: Option<Seq24>,
    tx_video_seq: Seq24,
    inputs_applied: u64,
    inputs_dropped: u64,
    inputs_lost: u64,
}

impl Session {
    fn info(&self, now: Instant) -> SessionInfo {
        SessionInfo {
            id: self.id,
            address: self.address,
            video_address: self.video_address,
            slot: self.slot,
            state: self.state,
            connected_for: now.saturating_duration_since(self.connected_at),
            idle: now.saturating_duration_since(self.last_seen),
            last_input_seq: self.rx_input_seq,
            inputs_applied: self.inputs_applied,
            inputs_dropped: self.inputs_dropped,
            inputs_lost: self.inputs_lost,
        }
    }
}

// ── Public results ───────────────────────────────────────────────

/// Outcome of a successful [`SessionTable::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub session_id: u64,
    pub slot: Slot,
    /// `false` when the HELLO was a retry from an address already in the table.
    pub is_new: bool,
}

/// What happened to one CONTROLLER_STATE record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// Forwarded to the sink. `lost` counts sequence numbers skipped since
    /// the previous applied record.
    Applied { slot: Slot, lost: u32 },
    /// Older than or equal to the last applied record.
    Stale,
    /// The session has not finished its handshake yet.
    NotActive,
    /// No session for this address.
    UnknownSession,
}

/// Summary of a session that was just closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedSession {
    pub id: u64,
    pub address: SocketAddr,
    pub slot: Slot,
    pub reason: DisconnectReason,
    pub duration: Duration,
}

/// Read-only view of one session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub address: SocketAddr,
    pub video_address: SocketAddr,
    pub slot: Slot,
    pub state: SessionState,
    pub connected_for: Duration,
    pub idle: Duration,
    pub last_input_seq: Option<Seq24>,
    pub inputs_applied: u64,
    pub inputs_dropped: u64,
    pub inputs_lost: u64,
}

// ── SessionTable ─────────────────────────────────────────────────

/// Registry of connected clients, indexed by slot.
pub struct SessionTable {
    slots: Vec<Option<Session>>,
    next_id: u64,
    sink: Arc<dyn VirtualControllerSink>,
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("slots", &self.slots)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl SessionTable {
    /// Create a table with `max_clients` slots, clamped to `1..=MAX_SLOTS`.
    pub fn new(max_clients: usize, sink: Arc<dyn VirtualControllerSink>) -> Self {
        let capacity = max_clients.clamp(1, MAX_SLOTS);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_id: 1,
            sink,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.sessions()
            .filter(|s| s.state == SessionState::Active)
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// The slot held by `address`, if it has a session.
    pub fn slot_of(&self, address: SocketAddr) -> Option<Slot> {
        self.find(address).map(|s| s.slot)
    }

    // ── Operations ───────────────────────────────────────────────

    /// Create a session for `address` in the lowest free slot.
    ///
    /// A repeated HELLO from an address that already has a session returns
    /// the same slot and refreshes its liveness.
    pub fn register(
        &mut self,
        address: SocketAddr,
        video_address: SocketAddr,
        now: Instant,
    ) -> Result<Registration, CouchError> {
        if let Some(session) = self.find_mut(address) {
            session.last_seen = now;
            session.video_address = video_address;
            debug!(%address, slot = %session.slot, "repeated hello");
            return Ok(Registration {
                session_id: session.id,
                slot: session.slot,
                is_new: false,
            });
        }

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            info!(%address, "rejecting client: server full");
            return Err(CouchError::ServerFull);
        };

        let id = self.next_id;
        self.next_id += 1;
        let slot = Slot::new(index as u8);
        self.slots[index] = Some(Session {
            id,
            address,
            video_address,
            slot,
            state: SessionState::Connecting,
            connected_at: now,
            last_seen: now,
            rx_input_seq: None,
            tx_video_seq: Seq24::ZERO,
            inputs_applied: 0,
            inputs_dropped: 0,
            inputs_lost: 0,
        });

        info!("client {address} connected on {slot}");
        Ok(Registration {
            session_id: id,
            slot,
            is_new: true,
        })
    }

    /// Mark the session Active once WELCOME has gone out.
    pub fn activate(&mut self, address: SocketAddr) -> bool {
        match self.find_mut(address) {
            Some(session) => {
                session.state = SessionState::Active;
                true
            }
            None => false,
        }
    }

    /// Refresh liveness for `address`. Returns `false` for unknown peers.
    pub fn touch(&mut self, address: SocketAddr, now: Instant) -> bool {
        match self.find_mut(address) {
            Some(session) => {
                session.last_seen = now;
                true
            }
            None => {
                debug!(%address, "keepalive from unknown peer");
                false
            }
        }
    }

    /// Apply one CONTROLLER_STATE record from `address`.
    pub fn apply_input(
        &mut self,
        address: SocketAddr,
        sequence: Seq24,
        state: &ControllerState,
        now: Instant,
    ) -> InputOutcome {
        let Some(index) = self.index_of(address) else {
            return InputOutcome::UnknownSession;
        };
        let Some(session) = self.slots[index].as_mut() else {
            return InputOutcome::UnknownSession;
        };

        session.last_seen = now;
        if session.state != SessionState::Active {
            return InputOutcome::NotActive;
        }

        let lost = match session.rx_input_seq {
            Some(prev) if !sequence.is_newer_than(prev) => {
                session.inputs_dropped += 1;
                return InputOutcome::Stale;
            }
            Some(prev) => sequence.gap_since(prev),
            None => 0,
        };

        session.rx_input_seq = Some(sequence);
        session.inputs_applied += 1;
        session.inputs_lost += u64::from(lost);
        let slot = session.slot;
        self.sink.update(slot, state);
        InputOutcome::Applied { slot, lost }
    }

    /// Close every session idle for longer than `timeout`.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<ClosedSession> {
        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref()
                    .filter(|s| now.saturating_duration_since(s.last_seen) > timeout)
                    .map(|_| i)
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|i| self.close(i, DisconnectReason::Timeout, now))
            .collect()
    }

    /// Close the session for `address`.
    pub fn disconnect(
        &mut self,
        address: SocketAddr,
        reason: DisconnectReason,
    ) -> Option<ClosedSession> {
        let index = self.index_of(address)?;
        self.close(index, reason, Instant::now())
    }

    /// Close every session, e.g. on host shutdown.
    pub fn disconnect_all(&mut self, reason: DisconnectReason) -> Vec<ClosedSession> {
        let now = Instant::now();
        (0..self.slots.len())
            .filter_map(|i| self.close(i, reason, now))
            .collect()
    }

    /// Video destinations of every Active session.
    pub fn broadcast_targets(&self) -> Vec<SocketAddr> {
        self.sessions()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| s.video_address)
            .collect()
    }

    /// Reserve `count` consecutive video sequence numbers on every Active
    /// session. Returns each video address with the first reserved number.
    pub fn reserve_video_sequences(&mut self, count: u32) -> Vec<(SocketAddr, Seq24)> {
        self.slots
            .iter_mut()
            .flatten()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| {
                let first = s.tx_video_seq;
                s.tx_video_seq = first.add(count);
                (s.video_address, first)
            })
            .collect()
    }

    /// Status view of every session, in slot order.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        self.sessions().map(|s| s.info(now)).collect()
    }

    // ── Internals ────────────────────────────────────────────────

    fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    fn index_of(&self, address: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.address == address))
    }

    fn find(&self, address: SocketAddr) -> Option<&Session> {
        self.sessions().find(|s| s.address == address)
    }

    fn find_mut(&mut self, address: SocketAddr) -> Option<&mut Session> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.address == address)
    }

    /// Zero the slot, then free it. The only place sessions are removed.
    fn close(&mut self, index: usize, reason: DisconnectReason, now: Instant) -> Option<ClosedSession> {
        let mut session = self.slots.get_mut(index)?.take()?;
        session.state = SessionState::Disconnected;
        self.sink.zero(session.slot);

        info!(
            "client {} disconnected: {reason} ({})",
            session.address, session.slot
        );
        Some(ClosedSession {
            id: session.id,
            address: session.address,
            slot: session.slot,
            reason,
            duration: now.saturating_duration_since(session.connected_at),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
