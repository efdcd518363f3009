use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);
pub const STATUS_METHOD: &str = "getStatus";

const TTS_MAX: f64 = 5.0;
const STT_MAX: f64 = 10.0;
const BAR_WIDTH: usize = 10;

/// Usage figures reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub tts_balance: Option<f64>,
    pub stt_balance: Option<f64>,
    #[serde(default)]
    pub llm_requests_today: u64,
}

/// Outcome of asking the session for status.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReply {
    /// No agent participant to ask.
    NoAgent,
    Payload(String),
}

/// Something that can perform the `getStatus` RPC.
pub trait StatusSource: Send + Sync + 'static {
    fn fetch_status(&self) -> impl Future<Output = Result<StatusReply>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub data: Option<StatusData>,
    pub loading: bool,
}

/// Polls status while the status page is visible.
///
/// Fetches run one at a time inside the polling task and are bounded by
/// [`RPC_TIMEOUT`], so a slow reply delays the next tick instead of
/// overlapping it.
pub struct StatusPoller {
    active: watch::Sender<bool>,
    snapshot: watch::Receiver<StatusSnapshot>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    pub fn spawn<S: StatusSource>(source: Arc<S>) -> Self {
        let (active_tx, active_rx) = watch::channel(false);
        let (snap_tx, snap_rx) = watch::channel(StatusSnapshot::default());
        let handle = tokio::spawn(poll_loop(source, active_rx, snap_tx));
        Self {
            active: active_tx,
            snapshot: snap_rx,
            handle,
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.send_if_modified(|current| {
            if *current == active {
                return false;
            }
            *current = active;
            true
        });
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// What a change of the active flag means for the running poll.
enum Gate {
    Resumed,
    Paused,
    Closed,
}

fn read_gate(
    changed: Result<(), watch::error::RecvError>,
    active: &mut watch::Receiver<bool>,
) -> Gate {
    if changed.is_err() {
        Gate::Closed
    } else if *active.borrow_and_update() {
        Gate::Resumed
    } else {
        Gate::Paused
    }
}

async fn poll_loop<S: StatusSource>(
    source: Arc<S>,
    mut active: watch::Receiver<bool>,
    snapshot: watch::Sender<StatusSnapshot>,
) {
    'session: loop {
        while !*active.borrow_and_update() {
            if active.changed().await.is_err() {
                return;
            }
        }
        debug!("status polling started");

        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let fetch = fetch_once(source.as_ref(), &snapshot);
                    tokio::pin!(fetch);
                    loop {
                        tokio::select! {
                            _ = &mut fetch => break,
                            changed = active.changed() => match read_gate(changed, &mut active) {
                                Gate::Closed => return,
                                Gate::Paused => {
                                    snapshot.send_modify(|s| s.loading = false);
                                    debug!("status polling stopped mid-fetch");
                                    continue 'session;
                                }
                                // Fetch again as soon as this one settles.
                                Gate::Resumed => ticker.reset_immediately(),
                            },
                        }
                    }
                }
                changed = active.changed() => match read_gate(changed, &mut active) {
                    Gate::Closed => return,
                    Gate::Paused => {
                        debug!("status polling stopped");
                        continue 'session;
                    }
                    Gate::Resumed => ticker.reset_immediately(),
                },
            }
        }
    }
}

async fn fetch_once<S: StatusSource>(source: &S, snapshot: &watch::Sender<StatusSnapshot>) {
    snapshot.send_modify(|s| s.loading = true);
    let outcome = timeout(RPC_TIMEOUT, source.fetch_status()).await;
    snapshot.send_modify(|s| {
        s.loading = false;
        match outcome {
            Ok(Ok(StatusReply::Payload(body))) => match serde_json::from_str::<StatusData>(&body) {
                Ok(data) => s.data = Some(data),
                Err(e) => warn!(error = %e, "status reply was not valid JSON"),
            },
            Ok(Ok(StatusReply::NoAgent)) => s.data = None,
            Ok(Err(e)) => warn!(error = %e, "status RPC failed"),
            Err(_) => warn!("status RPC timed out"),
        }
    });
}

/// ASCII progress bar, e.g. `[|||||     ]`.
pub fn progress_bar(value: f64, max: f64) -> String {
    let ratio = (value / max).clamp(0.0, 1.0);
    let filled = (ratio * BAR_WIDTH as f64).round() as usize;
    format!("[{}{}]", "|".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

pub fn format_balance(value: Option<f64>, max: f64, label: &str) -> String {
    match value {
        Some(v) => format!("{}: {} ${:.2}", label, progress_bar(v, max), v),
        None => format!("{}: N/A", label),
    }
}

/// Lines of the status page.
pub fn status_lines(snapshot: &StatusSnapshot, agent_connected: bool) -> Vec<String> {
    let agent = if agent_connected { "Connected" } else { "Disconnected" };
    let mut lines = vec![format!("BMO: {}", agent)];
    match (&snapshot.data, snapshot.loading) {
        (None, true) => {
            lines.push("TTS: ...".to_string());
            lines.push("STT: ...".to_string());
            lines.push("LLM: ...".to_string());
        }
        (data, _) => {
            lines.push(format_balance(data.as_ref().and_then(|d| d.tts_balance), TTS_MAX, "TTS"));
            lines.push(format_balance(data.as_ref().and_then(|d| d.stt_balance), STT_MAX, "STT"));
            match data {
                Some(d) => lines.push(format!("LLM: {} reqs today", d.llm_requests_today)),
                None => lines.push("LLM: N/A reqs today".to_string()),
            }
        }
    }
    lines
}
