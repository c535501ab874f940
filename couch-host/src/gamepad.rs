//! In-process bank of virtual gamepads.
//!
//! Stands in for the OS virtual-controller driver: it keeps the latest
//! state of every slot and logs button transitions, so a host without the
//! driver still shows what each player is doing.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use couch_core::{Buttons, ControllerState, MAX_SLOTS, Slot, VirtualControllerSink};

#[derive(Debug, Clone, Copy, Default)]
struct Pad {
    state: ControllerState,
    updates: u64,
}

/// Latest controller state per slot.
#[derive(Debug, Default)]
pub struct GamepadBank {
    pads: Mutex<[Pad; MAX_SLOTS]>,
}

impl GamepadBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `slot`. Neutral for slots nobody drives.
    pub fn state(&self, slot: Slot) -> ControllerState {
        self.pads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot.index())
            .map(|p| p.state)
            .unwrap_or_default()
    }

    /// Updates received per slot since start.
    pub fn update_counts(&self) -> [u64; MAX_SLOTS] {
        let pads = self.pads.lock().unwrap_or_else(PoisonError::into_inner);
        std::array::from_fn(|i| pads[i].updates)
    }
}

impl VirtualControllerSink for GamepadBank {
    fn update(&self, slot: Slot, state: &ControllerState) {
        let mut pads = self.pads.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pad) = pads.get_mut(slot.index()) else {
            return;
        };

        let before = pad.state.buttons;
        let after = state.buttons;
        let pressed = after.difference(before);
        let released = before.difference(after);
        if !pressed.is_empty() {
            info!("{slot}: pressed {}", button_names(pressed));
        }
        if !released.is_empty() {
            debug!("{slot}: released {}", button_names(released));
        }

        pad.state = *state;
        pad.updates += 1;
    }

    fn zero(&self, slot: Slot) {
        let mut pads = self.pads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pad) = pads.get_mut(slot.index()) {
            pad.state = ControllerState::NEUTRAL;
            info!("{slot}: returned to neutral");
        }
    }
}

/// Readable list of buttons, e.g. `A+START`.
pub fn button_names(buttons: Buttons) -> String {
    let names: Vec<&str> = buttons.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "none".into()
    } else {
        names.join("+")
    }
}
