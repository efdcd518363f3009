use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};

use crate::clock::Deadline;

/// Session connection state, as reported by the real-time service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "connected" => Self::Connected,
            "connecting" => Self::Connecting,
            "reconnecting" | "signalReconnecting" => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    pub fn is_offline(self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Remote agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    Listening,
    Thinking,
    Speaking,
    #[default]
    Other,
}

impl AgentState {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "listening" => Self::Listening,
            "thinking" => Self::Thinking,
            "speaking" => Self::Speaking,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouthShape {
    Smile,
    Sad,
    OpenSmile,
    /// Animated: OpenSmile, Smile, MouthOh.
    TalkHappy,
    MouthOh,
    OpenSad,
    /// Animated: OpenSad, Sad, MouthOh.
    TalkSad,
}

impl MouthShape {
    /// Static shape to draw at `elapsed` into the current mouth state.
    pub fn frame_at(self, elapsed: Duration) -> MouthShape {
        let frames: &[MouthShape; 3] = match self {
            MouthShape::TalkHappy => &[MouthShape::OpenSmile, MouthShape::Smile, MouthShape::MouthOh],
            MouthShape::TalkSad => &[MouthShape::OpenSad, MouthShape::Sad, MouthShape::MouthOh],
            other => return other,
        };
        let idx = (elapsed.as_millis() / TALK_FRAME.as_millis()) as usize % frames.len();
        frames[idx]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeShape {
    Normal,
    Closed,
    ClosedSquished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualState {
    pub mouth: MouthShape,
    pub eye: EyeShape,
}

impl VisualState {
    pub const fn new(mouth: MouthShape, eye: EyeShape) -> Self {
        Self { mouth, eye }
    }
}

pub const LISTENING: VisualState = VisualState::new(MouthShape::Smile, EyeShape::Normal);
pub const TALKING: VisualState = VisualState::new(MouthShape::TalkHappy, EyeShape::Normal);
pub const THINKING: VisualState = VisualState::new(MouthShape::MouthOh, EyeShape::Normal);
pub const OFFLINE: VisualState = VisualState::new(MouthShape::Sad, EyeShape::Normal);

const TALK_FRAME: Duration = Duration::from_millis(150);

/// Map connection + agent state to a face.
///
///   disconnected / reconnecting -> offline
///   agent speaking              -> talking
///   agent thinking              -> thinking
///   otherwise                   -> listening
pub fn map_visual_state(connection: ConnectionState, agent: AgentState) -> VisualState {
    if connection.is_offline() {
        return OFFLINE;
    }
    match agent {
        AgentState::Speaking => TALKING,
        AgentState::Thinking => THINKING,
        AgentState::Listening | AgentState::Other => LISTENING,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Offline,
    Connected,
    Talking,
}

pub fn led_state(connection: ConnectionState, agent: AgentState) -> LedState {
    if connection != ConnectionState::Connected {
        return LedState::Offline;
    }
    if agent == AgentState::Speaking {
        LedState::Talking
    } else {
        LedState::Connected
    }
}

/// Glow spread and blur for the LED; zero unless the agent is talking.
pub fn led_glow(led: LedState, volume: f32) -> (u16, u16) {
    if led != LedState::Talking {
        return (0, 0);
    }
    let v = volume.clamp(0.0, 1.0);
    let spread = (4.0 + v * 12.0).round() as u16;
    let blur = (8.0 + v * 16.0).round() as u16;
    (spread, blur)
}

const BLINK_HOLD: Duration = Duration::from_millis(100);
const BLINK_MIN_GAP_MS: u64 = 1000;
const BLINK_MAX_GAP_MS: u64 = 3000;

/// Closes both eyes for a moment at random 1-3 s intervals.
pub struct Blinker {
    rng: StdRng,
    next_blink: Deadline,
    reopen: Deadline,
}

impl Blinker {
    pub fn new(now: Instant) -> Self {
        Self::with_rng(now, StdRng::from_entropy())
    }

    pub fn with_rng(now: Instant, rng: StdRng) -> Self {
        let mut blinker = Self {
            rng,
            next_blink: Deadline::default(),
            reopen: Deadline::default(),
        };
        blinker.schedule(now);
        blinker
    }

    fn schedule(&mut self, now: Instant) {
        let gap = self.rng.gen_range(BLINK_MIN_GAP_MS..BLINK_MAX_GAP_MS);
        self.next_blink.arm(now, Duration::from_millis(gap));
    }

    pub fn tick(&mut self, now: Instant) {
        self.reopen.fire(now);
        if self.next_blink.fire(now) {
            self.reopen.arm(now, BLINK_HOLD);
            self.schedule(now);
        }
    }

    pub fn is_blinking(&self) -> bool {
        self.reopen.is_armed()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        crate::clock::earliest([self.next_blink.at(), self.reopen.at()])
    }
}
