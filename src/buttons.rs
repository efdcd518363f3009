use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::clock::Deadline;

/// Mouse events this soon after a touch event on the same control are the
/// browser/terminal replaying the touch and are ignored.
pub const SYNTHETIC_MOUSE_WINDOW: Duration = Duration::from_millis(750);
pub const MULTI_TAP_WINDOW: Duration = Duration::from_secs(2);
pub const MULTI_TAP_COUNT: usize = 5;
pub const COMBO_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressSource {
    Mouse,
    Touch,
    Key,
}

/// Pressed state of one control, shared by every input source.
#[derive(Debug, Default)]
pub struct ButtonPress {
    pressed: bool,
    last_touch: Option<Instant>,
}

impl ButtonPress {
    pub fn new() -> Self {
        Self::default()
    }

    fn accept(&mut self, source: PressSource, now: Instant) -> bool {
        match source {
            PressSource::Touch => {
                self.last_touch = Some(now);
                true
            }
            PressSource::Mouse => match self.last_touch {
                Some(t) => now.saturating_duration_since(t) >= SYNTHETIC_MOUSE_WINDOW,
                None => true,
            },
            PressSource::Key => true,
        }
    }

    pub fn down(&mut self, source: PressSource, now: Instant) -> bool {
        if !self.accept(source, now) {
            return false;
        }
        self.pressed = true;
        true
    }

    /// Release. Returns true when this completes a press, i.e. the control's
    /// action should fire.
    pub fn up(&mut self, source: PressSource, now: Instant) -> bool {
        if !self.accept(source, now) {
            return false;
        }
        std::mem::replace(&mut self.pressed, false)
    }

    /// Pointer left the control; cancels the press without firing.
    pub fn leave(&mut self) {
        self.pressed = false;
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Quadrant of a release point, given its offset from the pad's center in
/// screen coordinates (y grows downward). Horizontal wins ties.
pub fn direction_from_offset(dx: f32, dy: f32) -> Direction {
    if dx.abs() >= dy.abs() {
        if dx < 0.0 { Direction::Left } else { Direction::Right }
    } else if dy < 0.0 {
        Direction::Up
    } else {
        Direction::Down
    }
}

/// Directional pad: one press state, direction decided on release.
#[derive(Debug, Default)]
pub struct DPad {
    button: ButtonPress,
}

impl DPad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down(&mut self, source: PressSource, now: Instant) -> bool {
        self.button.down(source, now)
    }

    pub fn up(
        &mut self,
        source: PressSource,
        now: Instant,
        point: (f32, f32),
        center: (f32, f32),
    ) -> Option<Direction> {
        if !self.button.up(source, now) {
            return None;
        }
        Some(direction_from_offset(point.0 - center.0, point.1 - center.1))
    }

    /// Arrow keys already know their direction.
    pub fn key(&mut self, direction: Direction, now: Instant) -> Direction {
        self.button.down(PressSource::Key, now);
        self.button.up(PressSource::Key, now);
        direction
    }

    pub fn pressed(&self) -> bool {
        self.button.pressed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    ForceDisconnect,
    Reconnect,
}

/// Power control: reconnects with a single press when the session is not
/// fully up, force-disconnects after five quick presses when it is.
#[derive(Debug, Default)]
pub struct PowerTaps {
    presses: VecDeque<Instant>,
}

impl PowerTaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, now: Instant, fully_connected: bool) -> Option<PowerAction> {
        if !fully_connected {
            self.presses.clear();
            return Some(PowerAction::Reconnect);
        }

        self.presses.push_back(now);
        while let Some(first) = self.presses.front() {
            if now.saturating_duration_since(*first) >= MULTI_TAP_WINDOW {
                self.presses.pop_front();
            } else {
                break;
            }
        }

        if self.presses.len() >= MULTI_TAP_COUNT {
            self.presses.clear();
            return Some(PowerAction::ForceDisconnect);
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.presses.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboInput {
    Up,
    Down,
    Left,
    Right,
    BigRed,
}

impl From<Direction> for ComboInput {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Up => ComboInput::Up,
            Direction::Down => ComboInput::Down,
            Direction::Left => ComboInput::Left,
            Direction::Right => ComboInput::Right,
        }
    }
}

const COMBO_SEQUENCE: [ComboInput; 9] = [
    ComboInput::Up,
    ComboInput::Up,
    ComboInput::Down,
    ComboInput::Down,
    ComboInput::Left,
    ComboInput::Right,
    ComboInput::Left,
    ComboInput::Right,
    ComboInput::BigRed,
];

/// Hidden input sequence that toggles the face test mode.
#[derive(Debug, Default)]
pub struct SecretCombo {
    index: usize,
    timeout: Deadline,
}

impl SecretCombo {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.index = 0;
        self.timeout.cancel();
    }

    /// Feed one input; returns true when the full sequence was entered.
    pub fn feed(&mut self, input: ComboInput, now: Instant) -> bool {
        if self.timeout.fire(now) {
            self.index = 0;
        }
        if input != COMBO_SEQUENCE[self.index] {
            self.reset();
            return false;
        }
        self.index += 1;
        if self.index == COMBO_SEQUENCE.len() {
            self.reset();
            return true;
        }
        self.timeout.arm(now, COMBO_TIMEOUT);
        false
    }

    pub fn progress(&self) -> usize {
        self.index
    }
}
