use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::bridge::SessionEvent;
use crate::buttons::{ButtonPress, ComboInput, DPad, Direction, PowerAction, PowerTaps, PressSource, SecretCombo};
use crate::cassette::{CassetteEvent, CassettePhase, CassetteQueue};
use crate::clock::earliest;
use crate::face::{FaceInputs, OverrideStack, ResolvedFace};
use crate::messages::{self, CassetteMessage, DataMessage};
use crate::meter::{SampleTap, VolumeMeter};
use crate::screen::{PowerAnim, ScreenEvent, ScreenPower};
use crate::sfx::{Sfx, SoundEngine};
use crate::visual::{
    AgentState, Blinker, ConnectionState, EyeShape, LedState, MouthShape, led_glow, led_state,
};

const GLASS_TAP_DEBOUNCE: Duration = Duration::from_millis(250);
const GLASS_SHAKE_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Face,
    Status,
}

/// Requests from the engine to whoever owns the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ForceDisconnect,
    Reconnect,
    StatusPageVisible(bool),
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub face: ResolvedFace,
    /// Static mouth to draw (talk animations resolved to a frame).
    pub mouth: MouthShape,
    pub eye: EyeShape,
    pub led: LedState,
    pub glow: (u16, u16),
    pub volume: f32,
    pub screen_off: bool,
    pub content_visible: bool,
    pub power_anim: Option<PowerAnim>,
    pub cassette_title: Option<String>,
    pub cassette_phase: Option<CassettePhase>,
    pub modal: Option<CassetteMessage>,
    pub page: Page,
    pub test_mode: bool,
    pub connection: ConnectionState,
    pub agent: AgentState,
    pub agent_present: bool,
    pub pressed_big_red: bool,
    pub pressed_dpad: bool,
}

/// One companion instance: reconciles session events and user input into a
/// single rendered state. Time only advances through the `now` arguments.
pub struct Engine {
    connection: ConnectionState,
    agent: AgentState,
    agent_present: bool,
    overrides: OverrideStack,
    cassette: CassetteQueue,
    screen: ScreenPower,
    blinker: Blinker,
    big_red: ButtonPress,
    dpad: DPad,
    power: PowerTaps,
    combo: SecretCombo,
    last_glass_tap: Option<Instant>,
    sfx: SoundEngine,
    meter: VolumeMeter,
    page: Page,
    mouth_anchor: (MouthShape, Instant),
}

impl Engine {
    pub fn new(sfx: SoundEngine, now: Instant) -> Self {
        Self::with_blinker(sfx, Blinker::new(now), now)
    }

    pub fn with_blinker(sfx: SoundEngine, blinker: Blinker, now: Instant) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            agent: AgentState::Other,
            agent_present: false,
            overrides: OverrideStack::new(),
            cassette: CassetteQueue::new(),
            screen: ScreenPower::new(now),
            blinker,
            big_red: ButtonPress::new(),
            dpad: DPad::new(),
            power: PowerTaps::new(),
            combo: SecretCombo::new(),
            last_glass_tap: None,
            sfx,
            meter: VolumeMeter::new(None),
            page: Page::Face,
            mouth_anchor: (MouthShape::Sad, now),
        }
    }

    /// Session is up and the agent is in it.
    pub fn fully_connected(&self) -> bool {
        self.connection == ConnectionState::Connected && self.agent_present
    }

    pub fn set_agent_track(&mut self, track: Option<SampleTap>) {
        self.meter.set_track(track);
        debug!(tracking = self.meter.has_track(), "agent audio track");
    }

    pub fn handle_session(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Connection(state) => {
                debug!(state = state.label(), "connection state");
                self.connection = state;
                self.sync_screen(now);
            }
            SessionEvent::Agent(state) => {
                self.agent = state;
                self.overrides.set_agent_state(state);
            }
            SessionEvent::AgentPresence(present) => {
                self.agent_present = present;
                self.sync_screen(now);
            }
            SessionEvent::Data { topic, payload } => match messages::decode(&topic, &payload) {
                Some(DataMessage::Cassette(msg)) => {
                    info!(title = %msg.title, "cassette received");
                    let events = self.cassette.receive(msg, now);
                    self.on_cassette(events, now);
                }
                Some(DataMessage::LoadingStatus(text)) => self.overrides.set_loading_text(text, now),
                None => {}
            },
        }
    }

    fn sync_screen(&mut self, now: Instant) {
        let connected = self.fully_connected();
        let event = self.screen.set_agent_connected(connected, now);
        self.on_screen(event, now);
    }

    fn on_screen(&mut self, event: Option<ScreenEvent>, now: Instant) {
        match event {
            Some(ScreenEvent::PowerOn) => {
                self.sfx.play(Sfx::TvOn, now);
            }
            Some(ScreenEvent::PowerOff) => {
                self.sfx.play(Sfx::TvOff, now);
            }
            None => {}
        }
    }

    fn on_cassette(&mut self, events: Vec<CassetteEvent>, now: Instant) {
        for event in events {
            match event {
                CassetteEvent::Inserting => {
                    self.sfx.play(Sfx::CassetteIn, now);
                    self.overrides.trigger_shake(now);
                }
                CassetteEvent::Ejecting => {
                    self.sfx.play(Sfx::CassetteOut, now);
                }
                CassetteEvent::Settled => {}
            }
        }
    }

    /// Fire whatever timers are due.
    pub fn tick(&mut self, now: Instant) {
        self.overrides.tick(now);
        let events = self.cassette.tick(now);
        self.on_cassette(events, now);
        let event = self.screen.tick(now);
        self.on_screen(event, now);
        self.blinker.tick(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.overrides.next_deadline(),
            self.cassette.next_deadline(),
            self.screen.next_deadline(),
            self.blinker.next_deadline(),
        ])
    }

    fn press_feedback(&mut self, now: Instant) {
        let sounds = self.sfx.play_press(now);
        if sounds.beep_boop {
            self.overrides.flash_beep_boop(now);
        }
    }

    fn feed_combo(&mut self, input: ComboInput, now: Instant) {
        if self.combo.feed(input, now) {
            let on = self.overrides.toggle_test_mode();
            info!(on, "face test mode");
        }
    }

    pub fn big_red_down(&mut self, source: PressSource, now: Instant) {
        self.big_red.down(source, now);
    }

    pub fn big_red_up(&mut self, source: PressSource, now: Instant) {
        if !self.big_red.up(source, now) {
            return;
        }
        self.press_feedback(now);
        if self.overrides.test_mode() {
            if let Some(name) = self.overrides.cycle_preset() {
                debug!(preset = name, "face preset");
            }
        }
        self.feed_combo(ComboInput::BigRed, now);
    }

    pub fn dpad_down(&mut self, source: PressSource, now: Instant) {
        self.dpad.down(source, now);
    }

    pub fn dpad_up(
        &mut self,
        source: PressSource,
        now: Instant,
        point: (f32, f32),
        center: (f32, f32),
    ) -> Option<Direction> {
        let direction = self.dpad.up(source, now, point, center)?;
        self.on_direction(direction, now);
        Some(direction)
    }

    pub fn dpad_key(&mut self, direction: Direction, now: Instant) {
        let direction = self.dpad.key(direction, now);
        self.on_direction(direction, now);
    }

    fn on_direction(&mut self, direction: Direction, now: Instant) {
        self.press_feedback(now);
        self.feed_combo(direction.into(), now);
    }

    pub fn power_press(&mut self, now: Instant) -> Option<Action> {
        self.sfx.play(Sfx::Button, now);
        match self.power.press(now, self.fully_connected())? {
            PowerAction::ForceDisconnect => {
                info!("force disconnect requested");
                Some(Action::ForceDisconnect)
            }
            PowerAction::Reconnect => Some(Action::Reconnect),
        }
    }

    /// Start/select: flip between the face and the status page.
    pub fn toggle_page(&mut self, now: Instant) -> Action {
        self.press_feedback(now);
        self.page = match self.page {
            Page::Face => Page::Status,
            Page::Status => Page::Face,
        };
        Action::StatusPageVisible(self.page == Page::Status)
    }

    pub fn tap_glass(&mut self, now: Instant) {
        if let Some(last) = self.last_glass_tap {
            if now.saturating_duration_since(last) < GLASS_TAP_DEBOUNCE {
                return;
            }
        }
        self.last_glass_tap = Some(now);
        self.sfx.play(Sfx::TapGlass, now);
        if self.sfx.chance(GLASS_SHAKE_PROBABILITY) {
            self.overrides.trigger_shake(now);
        }
    }

    pub fn tap_body(&mut self, now: Instant) {
        self.sfx.play(Sfx::TapBody, now);
    }

    pub fn open_cassette(&mut self, now: Instant) -> bool {
        if self.cassette.open_modal() {
            self.sfx.play(Sfx::Button, now);
            return true;
        }
        false
    }

    pub fn close_cassette(&mut self, now: Instant) -> bool {
        if self.cassette.close_modal() {
            self.sfx.play(Sfx::CassetteOut, now);
            return true;
        }
        false
    }

    pub fn cassette(&self) -> &CassetteQueue {
        &self.cassette
    }

    /// Resolve the frame at `now`. Samples the volume meter, so call once per
    /// rendered frame.
    pub fn frame(&mut self, now: Instant) -> Snapshot {
        let face = self.overrides.resolve(
            FaceInputs {
                connection: self.connection,
                agent: self.agent,
                cassette_animating: self.cassette.is_animating(),
            },
            now,
        );

        if self.mouth_anchor.0 != face.face.mouth {
            self.mouth_anchor = (face.face.mouth, now);
        }
        let mouth = face
            .face
            .mouth
            .frame_at(now.saturating_duration_since(self.mouth_anchor.1));
        let eye = if self.blinker.is_blinking() && face.face.eye == EyeShape::Normal {
            EyeShape::Closed
        } else {
            face.face.eye
        };

        let led = led_state(self.connection, self.agent);
        let volume = self.meter.sample();

        Snapshot {
            mouth,
            eye,
            led,
            glow: led_glow(led, volume),
            volume,
            screen_off: self.screen.screen_off(),
            content_visible: self.screen.content_visible(),
            power_anim: self.screen.anim(),
            cassette_title: self.cassette.current().map(|c| c.title.clone()),
            cassette_phase: self.cassette.phase(),
            modal: if self.cassette.modal_open() {
                self.cassette.current().cloned()
            } else {
                None
            },
            page: self.page,
            test_mode: self.overrides.test_mode(),
            connection: self.connection,
            agent: self.agent,
            agent_present: self.agent_present,
            pressed_big_red: self.big_red.pressed(),
            pressed_dpad: self.dpad.pressed(),
            face,
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.sfx.shutdown();
        self.meter.set_track(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::face::{FaceEffect, Layer, PRESETS};
    use crate::sfx::RecordingSink;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn engine(clock: &ManualClock, beep_boop: f64) -> (Engine, RecordingSink) {
        let sink = RecordingSink::default();
        let sfx = SoundEngine::with_rng(Box::new(sink.clone()), beep_boop, StdRng::seed_from_u64(3));
        let blinker = Blinker::with_rng(clock.now(), StdRng::seed_from_u64(4));
        (Engine::with_blinker(sfx, blinker, clock.now()), sink)
    }

    fn connect(e: &mut Engine, clock: &ManualClock) {
        e.handle_session(SessionEvent::Connection(ConnectionState::Connected), clock.now());
        e.handle_session(SessionEvent::AgentPresence(true), clock.now());
        e.handle_session(SessionEvent::Agent(AgentState::Listening), clock.now());
    }

    fn cassette(title: &str) -> SessionEvent {
        SessionEvent::Data {
            topic: "cassette".into(),
            payload: format!(r#"{{"title":"{}","content":"{} body"}}"#, title, title).into_bytes(),
        }
    }

    #[test]
    fn screen_powers_on_after_boot_when_agent_joins() {
        let clock = ManualClock::new();
        let (mut e, sink) = engine(&clock, 0.0);
        clock.advance_ms(500);
        e.tick(clock.now());
        assert!(e.frame(clock.now()).screen_off);

        connect(&mut e, &clock);
        let f = e.frame(clock.now());
        assert!(!f.screen_off);
        assert!(f.content_visible);
        assert_eq!(f.power_anim, Some(PowerAnim::On));
        assert_eq!(sink.count(Sfx::TvOn), 1);

        clock.advance_ms(240);
        e.tick(clock.now());
        assert_eq!(e.frame(clock.now()).power_anim, None);
    }

    #[test]
    fn cassette_replacement_sounds_and_shake() {
        let clock = ManualClock::new();
        let (mut e, sink) = engine(&clock, 0.0);
        connect(&mut e, &clock);

        e.handle_session(cassette("M1"), clock.now());
        assert_eq!(e.frame(clock.now()).face.effect, Some(FaceEffect::Shake));
        clock.advance_ms(420);
        e.tick(clock.now());
        sink.clear();

        e.handle_session(cassette("M2"), clock.now());
        clock.advance_ms(420);
        e.tick(clock.now());
        clock.advance_ms(420);
        e.tick(clock.now());

        assert_eq!(sink.count(Sfx::CassetteOut), 1);
        assert_eq!(sink.count(Sfx::CassetteIn), 1);
        let f = e.frame(clock.now());
        assert_eq!(f.cassette_phase, Some(CassettePhase::Steady));
        assert_eq!(f.cassette_title.as_deref(), Some("M2"));
    }

    #[test]
    fn malformed_cassette_changes_nothing() {
        let clock = ManualClock::new();
        let (mut e, sink) = engine(&clock, 0.0);
        connect(&mut e, &clock);
        sink.clear();

        e.handle_session(
            SessionEvent::Data {
                topic: "cassette".into(),
                payload: br#"{"title":123,"content":"x"}"#.to_vec(),
            },
            clock.now(),
        );
        let f = e.frame(clock.now());
        assert_eq!(f.cassette_phase, None);
        assert_eq!(f.cassette_title, None);
        assert!(sink.played().is_empty());
    }

    #[test]
    fn five_power_taps_disconnect_once() {
        let clock = ManualClock::new();
        let (mut e, _) = engine(&clock, 0.0);
        connect(&mut e, &clock);

        let actions: Vec<_> = (0..6)
            .filter_map(|_| {
                clock.advance_ms(100);
                e.power_press(clock.now())
            })
            .collect();
        assert_eq!(actions, vec![Action::ForceDisconnect]);
    }

    #[test]
    fn power_press_reconnects_when_offline() {
        let clock = ManualClock::new();
        let (mut e, _) = engine(&clock, 0.0);
        assert_eq!(e.power_press(clock.now()), Some(Action::Reconnect));
    }

    #[test]
    fn beep_boop_press_flashes_face() {
        let clock = ManualClock::new();
        let (mut e, sink) = engine(&clock, 1.0);
        connect(&mut e, &clock);
        e.big_red_down(PressSource::Key, clock.now());
        assert!(e.frame(clock.now()).pressed_big_red);
        e.big_red_up(PressSource::Key, clock.now());

        assert_eq!(sink.count(Sfx::BeepBoop), 1);
        assert_eq!(e.frame(clock.now()).face.layer, Layer::BeepBoop);
        clock.advance_ms(120);
        e.tick(clock.now());
        assert_eq!(e.frame(clock.now()).face.layer, Layer::Base);
    }

    #[test]
    fn secret_combo_enables_test_mode_over_everything() {
        let clock = ManualClock::new();
        let (mut e, _) = engine(&clock, 0.0);
        connect(&mut e, &clock);
        e.handle_session(SessionEvent::Agent(AgentState::Thinking), clock.now());

        use Direction::*;
        for d in [Up, Up, Down, Down, Left, Right, Left, Right] {
            e.dpad_key(d, clock.now());
        }
        e.big_red_down(PressSource::Key, clock.now());
        e.big_red_up(PressSource::Key, clock.now());
        e.tap_glass(clock.now());
        e.handle_session(cassette("M1"), clock.now());

        let f = e.frame(clock.now());
        assert!(f.test_mode);
        assert_eq!(f.face.face, PRESETS[0].face);
        assert_eq!(f.face.pose, None);
        assert_eq!(f.face.effect, None);
    }

    #[test]
    fn loading_status_shows_until_agent_speaks() {
        let clock = ManualClock::new();
        let (mut e, _) = engine(&clock, 0.0);
        connect(&mut e, &clock);
        e.handle_session(SessionEvent::Agent(AgentState::Thinking), clock.now());
        e.handle_session(
            SessionEvent::Data {
                topic: "loading-status".into(),
                payload: br#"{"text":"Looking it up"}"#.to_vec(),
            },
            clock.now(),
        );
        assert_eq!(e.frame(clock.now()).face.layer, Layer::Loading);

        e.handle_session(SessionEvent::Agent(AgentState::Speaking), clock.now());
        let f = e.frame(clock.now());
        assert_eq!(f.face.layer, Layer::Base);
        assert_eq!(f.led, LedState::Talking);
    }

    #[test]
    fn talking_mouth_animates() {
        let clock = ManualClock::new();
        let (mut e, _) = engine(&clock, 0.0);
        connect(&mut e, &clock);
        e.handle_session(SessionEvent::Agent(AgentState::Speaking), clock.now());
        let a = e.frame(clock.now()).mouth;
        clock.advance_ms(150);
        let b = e.frame(clock.now()).mouth;
        assert_eq!(a, MouthShape::OpenSmile);
        assert_eq!(b, MouthShape::Smile);
    }

    #[test]
    fn page_toggle_and_modal() {
        let clock = ManualClock::new();
        let (mut e, sink) = engine(&clock, 0.0);
        assert_eq!(e.toggle_page(clock.now()), Action::StatusPageVisible(true));
        assert_eq!(e.toggle_page(clock.now()), Action::StatusPageVisible(false));

        assert!(!e.open_cassette(clock.now()));
        connect(&mut e, &clock);
        e.handle_session(cassette("M1"), clock.now());
        assert!(e.open_cassette(clock.now()));
        assert_eq!(e.frame(clock.now()).modal.map(|m| m.content), Some("M1 body".to_string()));
        sink.clear();
        assert!(e.close_cassette(clock.now()));
        assert_eq!(sink.count(Sfx::CassetteOut), 1);
        assert_eq!(e.cassette().phase(), Some(CassettePhase::Insert));
    }
}
