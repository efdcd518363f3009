use ratatui::style::Color;
use ratatui::widgets::BorderType;

use crate::visual::LedState;

/// Glow spread thresholds (cells of "light" around the LED).
const MEDIUM_SPREAD: u16 = 8;
const WIDE_SPREAD: u16 = 12;

/// Border style around the screen, driven by the LED glow spread.
/// - below 8: plain
/// - 8-12: thick
/// - 12 and up: double
pub fn glow_border(spread: u16) -> BorderType {
    if spread < MEDIUM_SPREAD {
        BorderType::Plain
    } else if spread < WIDE_SPREAD {
        BorderType::Thick
    } else {
        BorderType::Double
    }
}

/// LED colour. While talking it brightens from teal towards cyan with the
/// agent's volume.
pub fn led_color(led: LedState, volume: f32) -> Color {
    match led {
        LedState::Offline => Color::Red,
        LedState::Connected => Color::Green,
        LedState::Talking => {
            let t = volume.clamp(0.0, 1.0);
            Color::Rgb(lerp(0, 120, t), lerp(128, 255, t), lerp(128, 255, t))
        }
    }
}

/// Horizontal offset of the face while a shake is playing.
/// Cycles through {-2, 2, -1, 1, 0} on successive frames.
pub fn shake_offset(shaking: bool, tick: u64) -> i16 {
    if !shaking {
        return 0;
    }
    match tick % 5 {
        0 => -2,
        1 => 2,
        2 => -1,
        3 => 1,
        _ => 0,
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    let result = a as f32 + (b as f32 - a as f32) * t;
    result.clamp(0.0, 255.0) as u8
}
