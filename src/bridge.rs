use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::meter::SampleTap;
use crate::status::{RPC_TIMEOUT, STATUS_METHOD, StatusReply, StatusSource};
use crate::visual::{AgentState, ConnectionState};

/// Frames the bridge host sends us.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeInbound {
    #[serde(rename = "connectionState")]
    ConnectionState { state: String },

    #[serde(rename = "agentState")]
    AgentState { state: String },

    #[serde(rename = "agentPresence")]
    AgentPresence { present: bool },

    #[serde(rename = "data")]
    Data { topic: String, payload: String },

    /// Base64 of little-endian f32 mono PCM from the agent's track.
    #[serde(rename = "audio")]
    Audio { pcm: String },

    #[serde(rename = "rpcResponse")]
    RpcResponse {
        id: String,
        #[serde(default)]
        payload: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Frames we send to the bridge host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeOutbound {
    #[serde(rename = "rpcRequest")]
    RpcRequest {
        id: String,
        method: String,
        payload: String,
        timeout_ms: u64,
    },

    #[serde(rename = "disconnect")]
    Disconnect,

    #[serde(rename = "reconnect")]
    Reconnect,
}

/// Session events for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connection(ConnectionState),
    Agent(AgentState),
    AgentPresence(bool),
    Data { topic: String, payload: Vec<u8> },
}

type PendingRpcs = Arc<Mutex<HashMap<String, oneshot::Sender<Result<String>>>>>;

/// Websocket link to the process that holds the real-time session.
pub struct AgentBridge {
    outbound: mpsc::UnboundedSender<BridgeOutbound>,
    pending: PendingRpcs,
    agent_present: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl AgentBridge {
    pub async fn connect(
        url: &str,
        tap: SampleTap,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| anyhow!("Failed to connect to agent bridge at {}: {}", url, e))?;
        info!(url, "agent bridge connected");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<BridgeOutbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();

        let pending: PendingRpcs = Arc::new(Mutex::new(HashMap::new()));
        let agent_present = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));

        // Outgoing frames.
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode bridge frame");
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        // Incoming frames.
        let reader_pending = pending.clone();
        let reader_presence = agent_present.clone();
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "agent bridge read failed");
                        break;
                    }
                };
                match serde_json::from_str::<BridgeInbound>(&text) {
                    Ok(inbound) => {
                        if let Some(event) =
                            route_inbound(inbound, &tap, &reader_pending, &reader_presence)
                        {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring unknown bridge frame"),
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            reader_presence.store(false, Ordering::SeqCst);
            if let Ok(mut pending) = reader_pending.lock() {
                for (_, waiter) in pending.drain() {
                    let _ = waiter.send(Err(anyhow!("agent bridge closed")));
                }
            }
            info!("agent bridge closed");
            let _ = event_tx.send(SessionEvent::AgentPresence(false));
            let _ = event_tx.send(SessionEvent::Connection(ConnectionState::Disconnected));
        });

        let bridge = Arc::new(Self {
            outbound: out_tx,
            pending,
            agent_present,
            open,
        });
        Ok((bridge, event_rx))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn agent_present(&self) -> bool {
        self.agent_present.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.outbound
            .send(BridgeOutbound::Disconnect)
            .map_err(|_| anyhow!("agent bridge closed"))
    }

    pub fn reconnect(&self) -> Result<()> {
        self.outbound
            .send(BridgeOutbound::Reconnect)
            .map_err(|_| anyhow!("agent bridge closed"))
    }

    /// Request/response call to the agent participant.
    pub async fn perform_rpc(&self, method: &str, payload: &str, timeout: Duration) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| anyhow!("rpc table poisoned"))?
            .insert(id.clone(), tx);

        let request = BridgeOutbound::RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            payload: payload.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        if self.outbound.send(request).is_err() {
            self.forget(&id);
            anyhow::bail!("agent bridge closed");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("rpc {} dropped", method)),
            Err(_) => {
                self.forget(&id);
                Err(anyhow!("rpc {} timed out after {:?}", method, timeout))
            }
        }
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }
}

impl StatusSource for AgentBridge {
    fn fetch_status(&self) -> impl Future<Output = Result<StatusReply>> + Send {
        async move {
            if !self.agent_present() {
                return Ok(StatusReply::NoAgent);
            }
            let body = self.perform_rpc(STATUS_METHOD, "", RPC_TIMEOUT).await?;
            Ok(StatusReply::Payload(body))
        }
    }
}

/// Handle one inbound frame: RPC replies and audio are consumed here, the
/// rest becomes a [`SessionEvent`].
fn route_inbound(
    inbound: BridgeInbound,
    tap: &SampleTap,
    pending: &PendingRpcs,
    agent_present: &AtomicBool,
) -> Option<SessionEvent> {
    match inbound {
        BridgeInbound::ConnectionState { state } => {
            Some(SessionEvent::Connection(ConnectionState::from_wire(&state)))
        }
        BridgeInbound::AgentState { state } => Some(SessionEvent::Agent(AgentState::from_wire(&state))),
        BridgeInbound::AgentPresence { present } => {
            agent_present.store(present, Ordering::SeqCst);
            Some(SessionEvent::AgentPresence(present))
        }
        BridgeInbound::Data { topic, payload } => Some(SessionEvent::Data {
            topic,
            payload: payload.into_bytes(),
        }),
        BridgeInbound::Audio { pcm } => {
            match decode_pcm(&pcm) {
                Ok(samples) => tap.push(&samples),
                Err(e) => debug!(error = %e, "dropping audio frame"),
            }
            None
        }
        BridgeInbound::RpcResponse { id, payload, error } => {
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
            match waiter {
                Some(waiter) => {
                    let result = match error {
                        Some(e) => Err(anyhow!("rpc error: {}", e)),
                        None => Ok(payload.unwrap_or_default()),
                    };
                    let _ = waiter.send(result);
                }
                None => debug!(id = %id, "late rpc response"),
            }
            None
        }
    }
}

/// Decode base64 little-endian f32 PCM.
pub fn decode_pcm(encoded: &str) -> Result<Vec<f32>> {
    let bytes = general_purpose::STANDARD.decode(encoded)?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("pcm frame length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> BridgeInbound {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_state_frames() {
        let pending: PendingRpcs = Arc::default();
        let presence = AtomicBool::new(false);
        let tap = SampleTap::new();

        let ev = route_inbound(
            parse(r#"{"type":"connectionState","data":{"state":"reconnecting"}}"#),
            &tap,
            &pending,
            &presence,
        );
        assert_eq!(ev, Some(SessionEvent::Connection(ConnectionState::Reconnecting)));

        let ev = route_inbound(
            parse(r#"{"type":"agentState","data":{"state":"thinking"}}"#),
            &tap,
            &pending,
            &presence,
        );
        assert_eq!(ev, Some(SessionEvent::Agent(AgentState::Thinking)));

        route_inbound(
            parse(r#"{"type":"agentPresence","data":{"present":true}}"#),
            &tap,
            &pending,
            &presence,
        );
        assert!(presence.load(Ordering::SeqCst));
    }

    #[test]
    fn data_frames_keep_payload_bytes() {
        let pending: PendingRpcs = Arc::default();
        let ev = route_inbound(
            parse(r#"{"type":"data","data":{"topic":"cassette","payload":"{\"title\":\"a\"}"}}"#),
            &SampleTap::new(),
            &pending,
            &AtomicBool::new(true),
        );
        assert_eq!(
            ev,
            Some(SessionEvent::Data {
                topic: "cassette".into(),
                payload: br#"{"title":"a"}"#.to_vec(),
            })
        );
    }

    #[tokio::test]
    async fn rpc_response_reaches_waiter() {
        let pending: PendingRpcs = Arc::default();
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert("abc".into(), tx);

        let ev = route_inbound(
            parse(r#"{"type":"rpcResponse","data":{"id":"abc","payload":"{}"}}"#),
            &SampleTap::new(),
            &pending,
            &AtomicBool::new(true),
        );
        assert!(ev.is_none());
        assert_eq!(rx.await.unwrap().unwrap(), "{}");
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rpc_error_is_propagated() {
        let pending: PendingRpcs = Arc::default();
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert("x".into(), tx);
        route_inbound(
            parse(r#"{"type":"rpcResponse","data":{"id":"x","error":"no such method"}}"#),
            &SampleTap::new(),
            &pending,
            &AtomicBool::new(true),
        );
        assert!(rx.await.unwrap().is_err());
    }

    #[test]
    fn decodes_pcm() {
        let samples = [0.5f32, -0.25];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let encoded = general_purpose::STANDARD.encode(bytes);
        assert_eq!(decode_pcm(&encoded).unwrap(), samples.to_vec());
        assert!(decode_pcm("AAA=").is_err());
    }

    #[test]
    fn outbound_frames_are_tagged() {
        let json = serde_json::to_string(&BridgeOutbound::RpcRequest {
            id: "1".into(),
            method: "getStatus".into(),
            payload: String::new(),
            timeout_ms: 10_000,
        })
        .unwrap();
        assert!(json.contains(r#""type":"rpcRequest""#));
        assert!(json.contains(r#""timeout_ms":10000"#));

        let json = serde_json::to_string(&BridgeOutbound::Disconnect).unwrap();
        assert_eq!(json, r#"{"type":"disconnect"}"#);
    }
}
