//! The seam between the host transport and whatever presents controllers
//! to the local machine.

use crate::protocol::{ControllerState, Slot};

/// Receives controller state for the host's virtual controller slots.
///
/// Calls are made while the session table lock is held, so implementations
/// must return quickly and must not call back into the transport.
pub trait VirtualControllerSink: Send + Sync {
    /// Replace the state of `slot` with `state`.
    fn update(&self, slot: Slot, state: &ControllerState);

    /// Return `slot` to neutral. Called once when its session closes.
    fn zero(&self, slot: Slot);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl VirtualControllerSink for NullSink {
    fn update(&self, _slot: Slot, _state: &ControllerState) {}

    fn zero(&self, _slot: Slot) {}
}
