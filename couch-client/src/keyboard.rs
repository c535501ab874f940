//! Keyboard → controller mapping.
//!
//! ```text
//! WASD layout (default)          Arrows layout
//!   W A S D    left stick          arrows     left stick
//!   arrows     right stick         I J K L    right stick
//!   J K I L    A B X Y             W S A D    A B X Y
//!   Q / E      left / right trigger
//!   1 / 2      left / right shoulder
//!   numpad 8 4 2 6   d-pad
//!   Enter / Backspace   START / BACK
//!   Shift      stick press (with a stick key, or on its own)
//!   Esc        quit
//! ```
//!
//! Most terminals only report key presses and auto-repeat. A key is then
//! treated as held for `key_hold` after its last press event. Terminals that
//! report releases switch the mapper to exact press/release tracking.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyEventState, KeyModifiers, ModifierKeyCode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use couch_core::{Buttons, ControllerState};

const STICK_MAX: i16 = i16::MAX;
const TRIGGER_MAX: u8 = u8::MAX;

/// Which half of the keyboard drives the left stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Wasd,
    Arrows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Control {
    Button(Buttons),
    LeftStick(Direction),
    RightStick(Direction),
    /// Thumb press from Shift plus a stick key, released with that key.
    LeftStickPress,
    RightStickPress,
    LeftTrigger,
    RightTrigger,
}

/// Result of feeding one key event to the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Mapped,
    Unmapped,
    Quit,
}

// ── KeyboardMapper ───────────────────────────────────────────────

/// Turns key events into a [`ControllerState`].
#[derive(Debug)]
pub struct KeyboardMapper {
    layout: Layout,
    key_hold: Duration,
    /// Held controls and when they lapse. `None` holds until released.
    held: HashMap<Control, Option<Instant>>,
    reports_release: bool,
}

impl KeyboardMapper {
    pub fn new(layout: Layout, key_hold: Duration) -> Self {
        Self {
            layout,
            key_hold,
            held: HashMap::new(),
            reports_release: false,
        }
    }

    pub fn reports_release(&self) -> bool {
        self.reports_release
    }

    /// Apply one key event.
    pub fn handle(&mut self, key: &KeyEvent, now: Instant) -> KeyOutcome {
        if key.kind == KeyEventKind::Release {
            self.reports_release = true;
        } else if is_quit(key) {
            return KeyOutcome::Quit;
        }

        let Some(control) = self.control_for(key) else {
            return KeyOutcome::Unmapped;
        };
        let thumb = match control {
            Control::LeftStick(_) => Some(Control::LeftStickPress),
            Control::RightStick(_) => Some(Control::RightStickPress),
            _ => None,
        };

        match key.kind {
            // Shift may already be up when the stick key is released.
            KeyEventKind::Release => {
                self.held.remove(&control);
                if let Some(thumb) = thumb {
                    self.held.remove(&thumb);
                }
            }
            KeyEventKind::Press | KeyEventKind::Repeat => {
                let until = (!self.reports_release).then(|| now + self.key_hold);
                self.held.insert(control, until);
                let shifted = key.modifiers.contains(KeyModifiers::SHIFT);
                if let Some(thumb) = thumb.filter(|_| shifted) {
                    self.held.insert(thumb, until);
                }
            }
        }
        KeyOutcome::Mapped
    }

    /// Drop every held control, e.g. when the terminal loses focus.
    pub fn release_all(&mut self) {
        self.held.clear();
    }

    /// The controller state at `now`, after lapsed keys are let go.
    pub fn state(&mut self, now: Instant) -> ControllerState {
        self.held
            .retain(|_, until| until.is_none_or(|deadline| deadline > now));

        let mut state = ControllerState::NEUTRAL;
        for control in self.held.keys() {
            match *control {
                Control::Button(b) => state.buttons |= b,
                Control::LeftStick(d) => push_stick(&mut state.left_x, &mut state.left_y, d),
                Control::RightStick(d) => push_stick(&mut state.right_x, &mut state.right_y, d),
                Control::LeftStickPress => state.buttons |= Buttons::LEFT_THUMB,
                Control::RightStickPress => state.buttons |= Buttons::RIGHT_THUMB,
                Control::LeftTrigger => state.left_trigger = TRIGGER_MAX,
                Control::RightTrigger => state.right_trigger = TRIGGER_MAX,
            }
        }
        state
    }

    fn control_for(&self, key: &KeyEvent) -> Option<Control> {
        let keypad = key.state.contains(KeyEventState::KEYPAD);

        if keypad {
            let dpad = match key.code {
                KeyCode::Char('8') | KeyCode::Up => Some(Buttons::DPAD_UP),
                KeyCode::Char('2') | KeyCode::Down => Some(Buttons::DPAD_DOWN),
                KeyCode::Char('4') | KeyCode::Left => Some(Buttons::DPAD_LEFT),
                KeyCode::Char('6') | KeyCode::Right => Some(Buttons::DPAD_RIGHT),
                _ => None,
            };
            if let Some(b) = dpad {
                return Some(Control::Button(b));
            }
        }

        let code = match key.code {
            KeyCode::Char(c) => KeyCode::Char(c.to_ascii_lowercase()),
            other => other,
        };
        let (left, right) = (Control::LeftStick, Control::RightStick);

        let layout_specific = match (self.layout, code) {
            (Layout::Wasd, KeyCode::Char('w')) => Some(left(Direction::Up)),
            (Layout::Wasd, KeyCode::Char('s')) => Some(left(Direction::Down)),
            (Layout::Wasd, KeyCode::Char('a')) => Some(left(Direction::Left)),
            (Layout::Wasd, KeyCode::Char('d')) => Some(left(Direction::Right)),
            (Layout::Wasd, KeyCode::Up) => Some(right(Direction::Up)),
            (Layout::Wasd, KeyCode::Down) => Some(right(Direction::Down)),
            (Layout::Wasd, KeyCode::Left) => Some(right(Direction::Left)),
            (Layout::Wasd, KeyCode::Right) => Some(right(Direction::Right)),
            (Layout::Wasd, KeyCode::Char('j')) => Some(Control::Button(Buttons::A)),
            (Layout::Wasd, KeyCode::Char('k')) => Some(Control::Button(Buttons::B)),
            (Layout::Wasd, KeyCode::Char('i')) => Some(Control::Button(Buttons::X)),
            (Layout::Wasd, KeyCode::Char('l')) => Some(Control::Button(Buttons::Y)),

            (Layout::Arrows, KeyCode::Up) => Some(left(Direction::Up)),
            (Layout::Arrows, KeyCode::Down) => Some(left(Direction::Down)),
            (Layout::Arrows, KeyCode::Left) => Some(left(Direction::Left)),
            (Layout::Arrows, KeyCode::Right) => Some(left(Direction::Right)),
            (Layout::Arrows, KeyCode::Char('i')) => Some(right(Direction::Up)),
            (Layout::Arrows, KeyCode::Char('k')) => Some(right(Direction::Down)),
            (Layout::Arrows, KeyCode::Char('j')) => Some(right(Direction::Left)),
            (Layout::Arrows, KeyCode::Char('l')) => Some(right(Direction::Right)),
            (Layout::Arrows, KeyCode::Char('w')) => Some(Control::Button(Buttons::A)),
            (Layout::Arrows, KeyCode::Char('s')) => Some(Control::Button(Buttons::B)),
            (Layout::Arrows, KeyCode::Char('a')) => Some(Control::Button(Buttons::X)),
            (Layout::Arrows, KeyCode::Char('d')) => Some(Control::Button(Buttons::Y)),
            _ => None,
        };
        if layout_specific.is_some() {
            return layout_specific;
        }

        // Without keypad reporting the numpad sends plain digits. 8, 4 and 6
        // still reach the d-pad; 2 stays on the right shoulder.
        let button = match code {
            KeyCode::Char('q') => return Some(Control::LeftTrigger),
            KeyCode::Char('e') => return Some(Control::RightTrigger),
            KeyCode::Char('1') => Buttons::LEFT_SHOULDER,
            KeyCode::Char('2') => Buttons::RIGHT_SHOULDER,
            KeyCode::Char('8') => Buttons::DPAD_UP,
            KeyCode::Char('4') => Buttons::DPAD_LEFT,
            KeyCode::Char('6') => Buttons::DPAD_RIGHT,
            KeyCode::Enter => Buttons::START,
            KeyCode::Backspace => Buttons::BACK,
            KeyCode::Modifier(ModifierKeyCode::LeftShift) => Buttons::LEFT_THUMB,
            KeyCode::Modifier(ModifierKeyCode::RightShift) => Buttons::RIGHT_THUMB,
            _ => return None,
        };
        Some(Control::Button(button))
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Esc => true,
        // Raw mode swallows SIGINT.
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Opposite directions cancel out. Up is positive Y.
fn push_stick(x: &mut i16, y: &mut i16, direction: Direction) {
    match direction {
        Direction::Up => *y = y.saturating_add(STICK_MAX),
        Direction::Down => *y = y.saturating_sub(STICK_MAX),
        Direction::Left => *x = x.saturating_sub(STICK_MAX),
        Direction::Right => *x = x.saturating_add(STICK_MAX),
    }
}

// ── Reader ───────────────────────────────────────────────────────

/// Read terminal key events on a blocking thread and publish the mapped
/// state on `input` until `quit` fires or every receiver is gone.
///
/// Esc or Ctrl-C cancels `quit`. The state returns to neutral on exit.
pub fn spawn_reader(
    mut mapper: KeyboardMapper,
    input: watch::Sender<ControllerState>,
    quit: CancellationToken,
    poll: Duration,
) -> JoinHandle<io::Result<()>> {
    tokio::task::spawn_blocking(move || {
        while !quit.is_cancelled() && !input.is_closed() {
            if event::poll(poll)? {
                match event::read()? {
                    Event::Key(key) => {
                        if mapper.handle(&key, Instant::now()) == KeyOutcome::Quit {
                            info!("quit requested");
                            quit.cancel();
                            break;
                        }
                    }
                    Event::FocusLost => {
                        debug!("terminal lost focus, releasing keys");
                        mapper.release_all();
                    }
                    _ => {}
                }
            }

            let next = mapper.state(Instant::now());
            input.send_if_modified(|current| {
                let changed = *current != next;
                *current = next;
                changed
            });
        }
        input.send_replace(ControllerState::NEUTRAL);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(150);

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn release(code: KeyCode) -> KeyEvent {
        KeyEvent::new_with_kind(code, KeyModifiers::NONE, KeyEventKind::Release)
    }

    fn keypad(code: KeyCode) -> KeyEvent {
        KeyEvent::new_with_kind_and_state(
            code,
            KeyModifiers::NONE,
            KeyEventKind::Press,
            KeyEventState::KEYPAD,
        )
    }

    #[test]
    fn wasd_drives_left_stick() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&press(KeyCode::Char('w')), now);
        mapper.handle(&press(KeyCode::Char('d')), now);
        let state = mapper.state(now);
        assert_eq!(state.left_y, i16::MAX);
        assert_eq!(state.left_x, i16::MAX);
        assert_eq!(state.right_x, 0);
    }

    #[test]
    fn opposite_directions_cancel() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&press(KeyCode::Left), now);
        mapper.handle(&press(KeyCode::Right), now);
        assert_eq!(mapper.state(now).right_x, 0);
    }

    #[test]
    fn face_buttons_and_triggers() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        for c in ['j', 'k', 'i', 'l', 'q', 'e', '1', '2'] {
            assert_eq!(mapper.handle(&press(KeyCode::Char(c)), now), KeyOutcome::Mapped);
        }
        mapper.handle(&press(KeyCode::Enter), now);
        mapper.handle(&press(KeyCode::Backspace), now);

        let state = mapper.state(now);
        assert_eq!(
            state.buttons,
            Buttons::A
                | Buttons::B
                | Buttons::X
                | Buttons::Y
                | Buttons::LEFT_SHOULDER
                | Buttons::RIGHT_SHOULDER
                | Buttons::START
                | Buttons::BACK
        );
        assert_eq!(state.left_trigger, 255);
        assert_eq!(state.right_trigger, 255);
    }

    #[test]
    fn keypad_digits_drive_dpad() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&keypad(KeyCode::Char('2')), now);
        mapper.handle(&keypad(KeyCode::Left), now);
        let state = mapper.state(now);
        assert_eq!(state.buttons, Buttons::DPAD_DOWN | Buttons::DPAD_LEFT);
        assert_eq!(state.right_x, 0);
    }

    #[test]
    fn shifted_stick_key_presses_thumb() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&KeyEvent::new(KeyCode::Char('W'), KeyModifiers::SHIFT), now);
        mapper.handle(&KeyEvent::new(KeyCode::Up, KeyModifiers::SHIFT), now);
        let state = mapper.state(now);
        assert_eq!(state.left_y, i16::MAX);
        assert_eq!(state.buttons, Buttons::LEFT_THUMB | Buttons::RIGHT_THUMB);
    }

    #[test]
    fn arrows_layout_swaps_sides() {
        let mut mapper = KeyboardMapper::new(Layout::Arrows, HOLD);
        let now = Instant::now();
        mapper.handle(&press(KeyCode::Down), now);
        mapper.handle(&press(KeyCode::Char('j')), now);
        mapper.handle(&press(KeyCode::Char('w')), now);
        let state = mapper.state(now);
        assert_eq!(state.left_y, -i16::MAX);
        assert_eq!(state.right_x, -i16::MAX);
        assert_eq!(state.buttons, Buttons::A);
    }

    #[test]
    fn held_key_lapses_without_release_events() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let start = Instant::now();
        mapper.handle(&press(KeyCode::Char('j')), start);
        assert!(mapper.state(start + HOLD / 2).is_pressed(Buttons::A));

        // Auto-repeat extends the hold.
        mapper.handle(&press(KeyCode::Char('j')), start + HOLD / 2);
        assert!(mapper.state(start + HOLD).is_pressed(Buttons::A));
        assert!(mapper.state(start + HOLD * 2).is_neutral());
    }

    #[test]
    fn release_events_switch_to_exact_tracking() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let start = Instant::now();
        mapper.handle(&release(KeyCode::Char('x')), start);
        assert!(mapper.reports_release());

        mapper.handle(&press(KeyCode::Char('k')), start);
        assert!(mapper.state(start + HOLD * 10).is_pressed(Buttons::B));

        mapper.handle(&release(KeyCode::Char('k')), start + HOLD * 10);
        assert!(mapper.state(start + HOLD * 10).is_neutral());
    }

    #[test]
    fn modifier_shift_keys_press_thumbs() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&press(KeyCode::Modifier(ModifierKeyCode::RightShift)), now);
        assert_eq!(mapper.state(now).buttons, Buttons::RIGHT_THUMB);
    }

    #[test]
    fn stick_release_drops_thumb_after_shift_up() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&release(KeyCode::Char('x')), now);

        let shifted_w = KeyEvent::new(KeyCode::Char('W'), KeyModifiers::SHIFT);
        mapper.handle(&shifted_w, now);
        let state = mapper.state(now);
        assert_eq!(state.buttons, Buttons::LEFT_THUMB);
        assert_eq!(state.left_y, i16::MAX);

        // Shift comes up first, so the release carries no modifier.
        mapper.handle(&release(KeyCode::Char('w')), now);
        assert!(mapper.state(now + HOLD * 10).is_neutral());
    }

    #[test]
    fn held_shift_key_survives_stick_release() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&release(KeyCode::Char('x')), now);

        mapper.handle(&press(KeyCode::Modifier(ModifierKeyCode::LeftShift)), now);
        mapper.handle(&KeyEvent::new(KeyCode::Char('W'), KeyModifiers::SHIFT), now);
        mapper.handle(&release(KeyCode::Char('w')), now);
        assert_eq!(mapper.state(now).buttons, Buttons::LEFT_THUMB);

        mapper.handle(&release(KeyCode::Modifier(ModifierKeyCode::LeftShift)), now);
        assert!(mapper.state(now).is_neutral());
    }

    #[test]
    fn escape_and_ctrl_c_quit() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        assert_eq!(mapper.handle(&press(KeyCode::Esc), now), KeyOutcome::Quit);
        assert_eq!(
            mapper.handle(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL), now),
            KeyOutcome::Quit
        );
        assert_eq!(mapper.handle(&press(KeyCode::Char('c')), now), KeyOutcome::Unmapped);
    }

    #[test]
    fn release_all_clears() {
        let mut mapper = KeyboardMapper::new(Layout::Wasd, HOLD);
        let now = Instant::now();
        mapper.handle(&press(KeyCode::Char('a')), now);
        mapper.release_all();
        assert!(mapper.state(now).is_neutral());
    }
}
