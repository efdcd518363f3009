pub mod draw;
pub mod voice_fx;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend, layout::Rect};
use std::io::{self, Stdout};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::{AgentBridge, SessionEvent};
use crate::buttons::{Direction, PressSource};
use crate::clock::{Clock, SystemClock};
use crate::config::BmoConfig;
use crate::engine::{Action, Engine};
use crate::face::Layer;
use crate::meter::SampleTap;
use crate::sfx::{Sfx, SoundEngine, SoundSink};
use crate::status::{StatusPoller, StatusSnapshot, status_lines};
use draw::{Areas, View, center, contains, draw_ui, layout};

const FRAME: Duration = Duration::from_millis(33);

/// Terminal stand-in for a speaker: logs each clip and shows the latest one
/// in the footer.
struct TerminalSink {
    last: Arc<Mutex<Option<String>>>,
}

impl SoundSink for TerminalSink {
    fn play(&mut self, sfx: Sfx, clip: &str) {
        debug!(?sfx, clip, "sfx");
        if let Ok(mut last) = self.last.lock() {
            *last = Some(clip.to_string());
        }
    }
}

struct Session {
    bridge: Arc<AgentBridge>,
    events: UnboundedReceiver<SessionEvent>,
    poller: StatusPoller,
}

/// The terminal companion: engine plus the live session around it.
struct Companion {
    engine: Engine,
    bridge_url: String,
    tap: SampleTap,
    session: Option<Session>,
    status_visible: bool,
    message: Option<String>,
    last_sfx: Arc<Mutex<Option<String>>>,
    tick: u64,
    /// Effect key and start frame of the shake being played.
    shake: (u64, u64),
    layer: Layer,
}

impl Companion {
    fn new(config: &BmoConfig, now: Instant) -> Self {
        let last_sfx = Arc::new(Mutex::new(None));
        let sink = TerminalSink {
            last: last_sfx.clone(),
        };
        let sfx = SoundEngine::new(Box::new(sink), config.beep_boop_probability());
        Self {
            engine: Engine::new(sfx, now),
            bridge_url: config.bridge_url().to_string(),
            tap: SampleTap::new(),
            session: None,
            status_visible: false,
            message: None,
            last_sfx,
            tick: 0,
            shake: (0, 0),
            layer: Layer::Base,
        }
    }

    async fn connect(&mut self) {
        match AgentBridge::connect(&self.bridge_url, self.tap.clone()).await {
            Ok((bridge, events)) => {
                let poller = StatusPoller::spawn(bridge.clone());
                poller.set_active(self.status_visible);
                self.session = Some(Session {
                    bridge,
                    events,
                    poller,
                });
                self.message = None;
            }
            Err(e) => {
                warn!(error = %e, "agent bridge unavailable");
                self.message = Some("Bridge offline, press p to retry".to_string());
            }
        }
    }

    /// Feed everything the bridge has queued into the engine.
    fn drain_events(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut events = Vec::new();
        let mut closed = false;
        loop {
            match session.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        for event in events {
            if let SessionEvent::AgentPresence(present) = event {
                self.engine.set_agent_track(present.then(|| self.tap.clone()));
            }
            self.engine.handle_session(event, now);
        }
        if closed {
            info!("session ended");
            self.session = None;
            self.message = Some("Bridge closed, press p to reconnect".to_string());
        }
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::ForceDisconnect => {
                if let Some(session) = &self.session {
                    if let Err(e) = session.bridge.disconnect() {
                        warn!(error = %e, "disconnect failed");
                    }
                }
            }
            Action::Reconnect => match &self.session {
                Some(session) if session.bridge.is_open() => {
                    if let Err(e) = session.bridge.reconnect() {
                        warn!(error = %e, "reconnect failed");
                    }
                }
                _ => self.connect().await,
            },
            Action::StatusPageVisible(visible) => {
                self.status_visible = visible;
                if let Some(session) = &self.session {
                    session.poller.set_active(visible);
                }
            }
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let snapshot = self
            .session
            .as_ref()
            .map(|s| s.poller.snapshot())
            .unwrap_or_else(StatusSnapshot::default);
        status_lines(&snapshot, self.engine.fully_connected())
    }

    fn last_sfx(&self) -> Option<String> {
        self.last_sfx.lock().ok().and_then(|l| l.clone())
    }

    /// Returns false when the user asked to quit.
    async fn handle_key(&mut self, key: KeyEvent, now: Instant) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') if !ctrl => return false,
            KeyCode::Char('c') if ctrl => return false,
            _ => {}
        }

        if self.engine.cassette().modal_open() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('c') | KeyCode::Enter) {
                self.engine.close_cassette(now);
            }
            return true;
        }

        match key.code {
            KeyCode::Up => self.engine.dpad_key(Direction::Up, now),
            KeyCode::Down => self.engine.dpad_key(Direction::Down, now),
            KeyCode::Left => self.engine.dpad_key(Direction::Left, now),
            KeyCode::Right => self.engine.dpad_key(Direction::Right, now),
            KeyCode::Char(' ') | KeyCode::Enter => {
                self.engine.big_red_down(PressSource::Key, now);
                self.engine.big_red_up(PressSource::Key, now);
            }
            KeyCode::Char('p') => {
                if let Some(action) = self.engine.power_press(now) {
                    self.apply(action).await;
                }
            }
            KeyCode::Char('s') | KeyCode::Tab => {
                let action = self.engine.toggle_page(now);
                self.apply(action).await;
            }
            KeyCode::Char('c') => {
                self.engine.open_cassette(now);
            }
            KeyCode::Char('g') => self.engine.tap_glass(now),
            KeyCode::Char('b') => self.engine.tap_body(now),
            _ => {}
        }
        true
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, areas: &Areas, now: Instant) {
        let (col, row) = (mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if self.engine.cassette().modal_open() {
                    self.engine.close_cassette(now);
                } else if contains(areas.dpad, col, row) {
                    self.engine.dpad_down(PressSource::Mouse, now);
                } else if contains(areas.big_red, col, row) {
                    self.engine.big_red_down(PressSource::Mouse, now);
                } else if contains(areas.screen, col, row) {
                    self.engine.tap_glass(now);
                } else if contains(areas.slot, col, row) {
                    self.engine.open_cassette(now);
                } else if contains(areas.body, col, row) {
                    self.engine.tap_body(now);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if contains(areas.dpad, col, row) {
                    // Cells are about twice as tall as they are wide.
                    let (cx, cy) = center(areas.dpad);
                    let point = (col as f32 + 0.5, (row as f32 + 0.5) * 2.0);
                    self.engine
                        .dpad_up(PressSource::Mouse, now, point, (cx, cy * 2.0));
                } else if contains(areas.big_red, col, row) {
                    self.engine.big_red_up(PressSource::Mouse, now);
                }
            }
            _ => {}
        }
    }

    /// How long to wait for input before the next frame.
    fn wait(&self, now: Instant) -> Duration {
        self.engine
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(FRAME)
            .min(FRAME)
    }
}

pub async fn run_tui(config: BmoConfig) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let clock = SystemClock;
    let mut companion = Companion::new(&config, clock.now());
    let result = run_tui_loop(&mut terminal, &mut companion, &clock).await;

    // Cleanup
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_tui_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    companion: &mut Companion,
    clock: &impl Clock,
) -> Result<()> {
    companion.connect().await;

    loop {
        let now = clock.now();
        companion.drain_events(now);
        companion.engine.tick(now);

        let snap = companion.engine.frame(now);
        if snap.face.layer != companion.layer {
            debug!(layer = ?snap.face.layer, "face layer");
            companion.layer = snap.face.layer;
        }
        if snap.face.effect_key != companion.shake.0 {
            companion.shake = (snap.face.effect_key, companion.tick);
        }
        let status_lines = companion.status_lines();
        let last_sfx = companion.last_sfx();
        let size = terminal.size()?;
        let areas = layout(Rect::new(0, 0, size.width, size.height));
        let view = View {
            snap: &snap,
            status_lines,
            message: companion.message.as_deref(),
            last_sfx: last_sfx.as_deref(),
            shake_frame: companion.tick.wrapping_sub(companion.shake.1),
        };
        terminal.draw(|f| draw_ui(f, &view))?;
        companion.tick = companion.tick.wrapping_add(1);

        if event::poll(companion.wait(clock.now()))? {
            let now = clock.now();
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !companion.handle_key(key, now).await {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => companion.handle_mouse(mouse, &areas, now),
                _ => {}
            }
        }
    }
}
