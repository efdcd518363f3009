use std::time::{Duration, Instant};
use tracing::debug;

use crate::clock::{Deadline, earliest};
use crate::visual::{
    AgentState, ConnectionState, EyeShape, MouthShape, VisualState, map_visual_state,
};

pub const SHAKE_DURATION: Duration = Duration::from_millis(300);
pub const BEEP_BOOP_FLASH: Duration = Duration::from_millis(120);
const REVEAL_STEP: Duration = Duration::from_millis(28);
const DOTS_STEP: Duration = Duration::from_millis(350);

const SHAKE_FACE: VisualState = VisualState::new(MouthShape::OpenSad, EyeShape::ClosedSquished);
const BEEP_BOOP_FACE: VisualState = VisualState::new(MouthShape::OpenSmile, EyeShape::Closed);
const LOADING_FACE: VisualState = VisualState::new(MouthShape::MouthOh, EyeShape::Closed);
const THINKING_POSE_FACE: VisualState = VisualState::new(MouthShape::MouthOh, EyeShape::Normal);
const CASSETTE_FACE: VisualState = VisualState::new(MouthShape::OpenSmile, EyeShape::Normal);

/// Named face used while test mode is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub face: VisualState,
}

pub const PRESETS: [Preset; 8] = [
    Preset { name: "smile", face: VisualState::new(MouthShape::Smile, EyeShape::Normal) },
    Preset { name: "sad", face: VisualState::new(MouthShape::Sad, EyeShape::Normal) },
    Preset { name: "open smile", face: VisualState::new(MouthShape::OpenSmile, EyeShape::Normal) },
    Preset { name: "talk happy", face: VisualState::new(MouthShape::TalkHappy, EyeShape::Normal) },
    Preset { name: "oh", face: VisualState::new(MouthShape::MouthOh, EyeShape::Normal) },
    Preset { name: "open sad", face: VisualState::new(MouthShape::OpenSad, EyeShape::Closed) },
    Preset { name: "talk sad", face: VisualState::new(MouthShape::TalkSad, EyeShape::Normal) },
    Preset { name: "squished", face: VisualState::new(MouthShape::Smile, EyeShape::ClosedSquished) },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    TestMode,
    Shake,
    BeepBoop,
    Loading,
    ThinkingPose,
    CassetteArrival,
    Base,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceEffect {
    Shake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacePose {
    Thinking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceMode {
    Face,
    Loading,
}

/// The one face to draw right now, plus the winning layer's annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFace {
    pub layer: Layer,
    pub face: VisualState,
    pub effect: Option<FaceEffect>,
    /// Bumped on every shake trigger so the renderer can replay the effect.
    pub effect_key: u64,
    pub pose: Option<FacePose>,
    pub mode: FaceMode,
    pub loading_text: Option<String>,
    pub preset: Option<&'static str>,
}

/// Loading-status text revealed one character at a time with cycling dots.
#[derive(Debug, Clone)]
struct LoadingText {
    text: String,
    since: Instant,
}

impl LoadingText {
    fn reveal(&self, now: Instant) -> String {
        let elapsed = now.saturating_duration_since(self.since);
        let shown = (elapsed.as_millis() / REVEAL_STEP.as_millis()) as usize;
        let dots = 1 + (elapsed.as_millis() / DOTS_STEP.as_millis()) as usize % 3;
        let mut out: String = self.text.chars().take(shown).collect();
        out.push_str(&".".repeat(dots));
        out
    }
}

/// Inputs the stack reads from other parts of the companion.
#[derive(Debug, Clone, Copy)]
pub struct FaceInputs {
    pub connection: ConnectionState,
    pub agent: AgentState,
    pub cassette_animating: bool,
}

/// Resolves competing face overrides by fixed precedence.
#[derive(Debug)]
pub struct OverrideStack {
    test_preset: Option<usize>,
    shake: Deadline,
    effect_key: u64,
    beep_boop: Deadline,
    loading: Option<LoadingText>,
    agent: AgentState,
}

impl Default for OverrideStack {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideStack {
    pub fn new() -> Self {
        Self {
            test_preset: None,
            shake: Deadline::default(),
            effect_key: 0,
            beep_boop: Deadline::default(),
            loading: None,
            agent: AgentState::Other,
        }
    }

    pub fn toggle_test_mode(&mut self) -> bool {
        self.test_preset = match self.test_preset {
            Some(_) => None,
            None => Some(0),
        };
        debug!(enabled = self.test_preset.is_some(), "test mode");
        self.test_preset.is_some()
    }

    /// Advance to the next preset; no-op outside test mode.
    pub fn cycle_preset(&mut self) -> Option<&'static str> {
        let idx = self.test_preset.as_mut()?;
        *idx = (*idx + 1) % PRESETS.len();
        Some(PRESETS[*idx].name)
    }

    pub fn test_mode(&self) -> bool {
        self.test_preset.is_some()
    }

    pub fn trigger_shake(&mut self, now: Instant) {
        self.effect_key += 1;
        self.shake.arm(now, SHAKE_DURATION);
    }

    pub fn flash_beep_boop(&mut self, now: Instant) {
        self.beep_boop.arm(now, BEEP_BOOP_FLASH);
    }

    pub fn set_loading_text(&mut self, text: String, now: Instant) {
        if text.is_empty() {
            self.loading = None;
        } else {
            self.loading = Some(LoadingText { text, since: now });
        }
    }

    /// Leaving Thinking drops any loading text; other transitions keep it.
    pub fn set_agent_state(&mut self, agent: AgentState) {
        if self.agent == AgentState::Thinking && agent != AgentState::Thinking {
            self.loading = None;
        }
        self.agent = agent;
    }

    pub fn tick(&mut self, now: Instant) {
        self.shake.fire(now);
        self.beep_boop.fire(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([self.shake.at(), self.beep_boop.at()])
    }

    pub fn resolve(&self, inputs: FaceInputs, now: Instant) -> ResolvedFace {
        let offline = inputs.connection.is_offline();
        let mut out = ResolvedFace {
            layer: Layer::Base,
            face: map_visual_state(inputs.connection, inputs.agent),
            effect: None,
            effect_key: self.effect_key,
            pose: None,
            mode: FaceMode::Face,
            loading_text: None,
            preset: None,
        };

        if let Some(idx) = self.test_preset {
            let preset = PRESETS[idx];
            out.layer = Layer::TestMode;
            out.face = preset.face;
            out.preset = Some(preset.name);
        } else if self.shake.is_armed() {
            out.layer = Layer::Shake;
            out.face = SHAKE_FACE;
            out.effect = Some(FaceEffect::Shake);
        } else if self.beep_boop.is_armed() {
            out.layer = Layer::BeepBoop;
            out.face = BEEP_BOOP_FACE;
        } else if let Some(loading) = &self.loading {
            out.layer = Layer::Loading;
            out.face = LOADING_FACE;
            out.mode = FaceMode::Loading;
            out.loading_text = Some(loading.reveal(now));
        } else if inputs.agent == AgentState::Thinking && !offline {
            out.layer = Layer::ThinkingPose;
            out.face = THINKING_POSE_FACE;
            out.pose = Some(FacePose::Thinking);
        } else if inputs.cassette_animating && !offline {
            out.layer = Layer::CassetteArrival;
            out.face = CASSETTE_FACE;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::visual::{OFFLINE, TALKING};

    fn inputs(connection: ConnectionState, agent: AgentState, cassette: bool) -> FaceInputs {
        FaceInputs {
            connection,
            agent,
            cassette_animating: cassette,
        }
    }

    #[test]
    fn test_mode_beats_everything() {
        let clock = ManualClock::new();
        let mut stack = OverrideStack::new();
        stack.set_agent_state(AgentState::Thinking);
        stack.trigger_shake(clock.now());
        stack.toggle_test_mode();

        let r = stack.resolve(inputs(ConnectionState::Connected, AgentState::Thinking, true), clock.now());
        assert_eq!(r.layer, Layer::TestMode);
        assert_eq!(r.face, PRESETS[0].face);
        assert_eq!(r.effect, None);
        assert_eq!(r.pose, None);

        let r = stack.resolve(inputs(ConnectionState::Disconnected, AgentState::Other, false), clock.now());
        assert_eq!(r.face, PRESETS[0].face, "even offline");
    }

    #[test]
    fn presets_cycle_in_order() {
        let mut stack = OverrideStack::new();
        assert_eq!(stack.cycle_preset(), None);
        stack.toggle_test_mode();
        assert_eq!(stack.cycle_preset(), Some(PRESETS[1].name));
        for _ in 0..PRESETS.len() - 1 {
            stack.cycle_preset();
        }
        let r = stack.resolve(inputs(ConnectionState::Connected, AgentState::Listening, false), Instant::now());
        assert_eq!(r.preset, Some(PRESETS[0].name));
        assert!(!stack.toggle_test_mode());
    }

    #[test]
    fn shake_expires_and_retriggers_with_new_key() {
        let clock = ManualClock::new();
        let mut stack = OverrideStack::new();
        let live = inputs(ConnectionState::Connected, AgentState::Speaking, false);

        stack.trigger_shake(clock.now());
        let first = stack.resolve(live, clock.now());
        assert_eq!(first.effect, Some(FaceEffect::Shake));

        clock.advance_ms(200);
        stack.trigger_shake(clock.now());
        let second = stack.resolve(live, clock.now());
        assert!(second.effect_key > first.effect_key);

        clock.advance_ms(299);
        stack.tick(clock.now());
        assert_eq!(stack.resolve(live, clock.now()).layer, Layer::Shake);
        clock.advance_ms(1);
        stack.tick(clock.now());
        let r = stack.resolve(live, clock.now());
        assert_eq!(r.layer, Layer::Base);
        assert_eq!(r.face, TALKING);
    }

    #[test]
    fn beep_boop_flash_is_short() {
        let clock = ManualClock::new();
        let mut stack = OverrideStack::new();
        let live = inputs(ConnectionState::Connected, AgentState::Listening, false);
        stack.flash_beep_boop(clock.now());
        assert_eq!(stack.resolve(live, clock.now()).layer, Layer::BeepBoop);
        clock.advance_ms(120);
        stack.tick(clock.now());
        assert_eq!(stack.resolve(live, clock.now()).layer, Layer::Base);
    }

    #[test]
    fn loading_text_reveals_and_clears_when_agent_moves_on() {
        let clock = ManualClock::new();
        let mut stack = OverrideStack::new();
        stack.set_agent_state(AgentState::Thinking);
        stack.set_loading_text("Searching".into(), clock.now());
        let thinking = inputs(ConnectionState::Connected, AgentState::Thinking, false);

        let r = stack.resolve(thinking, clock.now());
        assert_eq!(r.mode, FaceMode::Loading);
        assert_eq!(r.loading_text.as_deref(), Some("."));

        clock.advance_ms(28 * 3);
        let r = stack.resolve(thinking, clock.now());
        assert_eq!(r.loading_text.as_deref(), Some("Sea."));

        clock.advance_ms(1000);
        let r = stack.resolve(thinking, clock.now());
        assert!(r.loading_text.unwrap().starts_with("Searching."));

        stack.set_agent_state(AgentState::Speaking);
        let r = stack.resolve(inputs(ConnectionState::Connected, AgentState::Speaking, false), clock.now());
        assert_eq!(r.mode, FaceMode::Face);
        assert_eq!(r.layer, Layer::Base);
    }

    #[test]
    fn loading_text_survives_changes_that_do_not_leave_thinking() {
        let clock = ManualClock::new();
        let mut stack = OverrideStack::new();
        stack.set_agent_state(AgentState::Listening);
        stack.set_loading_text("Remembering".into(), clock.now());

        stack.set_agent_state(AgentState::Speaking);
        let speaking = inputs(ConnectionState::Connected, AgentState::Speaking, false);
        let r = stack.resolve(speaking, clock.now());
        assert_eq!(r.layer, Layer::Loading);

        stack.set_agent_state(AgentState::Thinking);
        stack.set_agent_state(AgentState::Thinking);
        let r = stack.resolve(speaking, clock.now());
        assert_eq!(r.layer, Layer::Loading);

        stack.set_agent_state(AgentState::Speaking);
        let r = stack.resolve(speaking, clock.now());
        assert_eq!(r.layer, Layer::Base);
        assert_eq!(r.loading_text, None);
    }

    #[test]
    fn thinking_pose_outranks_cassette_but_not_offline() {
        let stack = OverrideStack::new();
        let now = Instant::now();
        let r = stack.resolve(inputs(ConnectionState::Connected, AgentState::Thinking, true), now);
        assert_eq!(r.layer, Layer::ThinkingPose);
        assert_eq!(r.pose, Some(FacePose::Thinking));

        let r = stack.resolve(inputs(ConnectionState::Connected, AgentState::Listening, true), now);
        assert_eq!(r.layer, Layer::CassetteArrival);

        let r = stack.resolve(inputs(ConnectionState::Reconnecting, AgentState::Thinking, true), now);
        assert_eq!(r.layer, Layer::Base);
        assert_eq!(r.face, OFFLINE);
    }
}
