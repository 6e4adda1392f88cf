//! Per-client session state: outbound queues, heartbeats, and
//! reconnection.
//!
//! Every connected client gets a session keyed by `ws_id`. Events flow
//! through an mpsc channel to the socket writer while the client is
//! live; while suspended they accumulate in a bounded drop-oldest
//! queue and are replayed in order (tagged `queued: true`) when the
//! client reconnects with its prior session id.

pub mod ws;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue capacity per suspended session.
pub const OUTBOUND_QUEUE_CAP: usize = 100;

/// Heartbeat ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Missed pings before a live session is suspended.
const MAX_MISSED_PINGS: u32 = 3;

/// Channel depth for a live socket writer. Must exceed the queue cap
/// so a full backlog replays without loss on reconnect.
const CHANNEL_CAP: usize = OUTBOUND_QUEUE_CAP + 28;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server-to-client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session_info")]
    SessionInfo {
        session_id: String,
        reconnected: bool,
        queue_size: usize,
    },
    #[serde(rename = "stream_start")]
    StreamStart { model: String },
    #[serde(rename = "stream_chunk")]
    StreamChunk { content: String },
    #[serde(rename = "stream_end")]
    StreamEnd { model: String },
    #[serde(rename = "tool_status")]
    ToolStatus {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
    },
    #[serde(rename = "message")]
    ChatMessage {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "error")]
    Error { category: String, message: String },
    #[serde(rename = "conversation_set")]
    ConversationSet {
        conv_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    #[serde(rename = "conversation_renamed")]
    ConversationRenamed { conv_id: String, title: String },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
    #[serde(rename = "work_item_update")]
    WorkItemUpdate { event: String, item: Value },
}

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(default)]
        conv_id: Option<String>,
    },
    #[serde(rename = "abort")]
    Abort,
    #[serde(rename = "set_model")]
    SetModel { model: String },
    #[serde(rename = "set_conversation")]
    SetConversation { conv_id: String },
    #[serde(rename = "pong")]
    Pong,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QueuedEvent {
    queued_at: String,
    event: Value,
}

struct SessionEntry {
    sender: Option<mpsc::Sender<Value>>,
    queue: VecDeque<QueuedEvent>,
    conv_id: Option<String>,
    force_model: Option<String>,
    missed_pings: u32,
    /// Bumped on every connect/suspend so stale heartbeat tasks exit.
    generation: u64,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            sender: None,
            queue: VecDeque::new(),
            conv_id: None,
            force_model: None,
            missed_pings: 0,
            generation: 0,
        }
    }
}

/// All client sessions, keyed by `ws_id`.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a client. A known `prior_id` resumes that session and
    /// replays its queue in order, each event tagged `queued: true`.
    /// Returns the session id, whether this was a reconnect, and the
    /// receiver the socket writer drains.
    pub fn connect(&self, prior_id: Option<&str>) -> (String, bool, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel::<Value>(CHANNEL_CAP);
        let mut sessions = self.sessions.lock();

        let (ws_id, reconnected) = match prior_id {
            Some(prior) if sessions.contains_key(prior) => (prior.to_string(), true),
            _ => (format!("ws-{}", &Uuid::new_v4().simple().to_string()[..8]), false),
        };

        let entry = sessions.entry(ws_id.clone()).or_insert_with(SessionEntry::new);
        entry.generation += 1;
        entry.missed_pings = 0;
        entry.sender = Some(tx.clone());

        let queued: Vec<QueuedEvent> = entry.queue.drain(..).collect();
        let queue_size = queued.len();
        drop(sessions);

        // Replay the backlog in order, then announce the session.
        for item in queued {
            let mut event = item.event;
            if let Value::Object(map) = &mut event {
                map.insert("queued".into(), Value::Bool(true));
                map.insert("queued_at".into(), Value::String(item.queued_at));
            }
            let _ = tx.try_send(event);
        }
        let info = serde_json::to_value(ServerEvent::SessionInfo {
            session_id: ws_id.clone(),
            reconnected,
            queue_size,
        })
        .expect("event serializes");
        let _ = tx.try_send(info);

        tracing::info!(ws_id = %ws_id, reconnected, queue_size, "session connected");
        (ws_id, reconnected, rx)
    }

    /// Suspend a session: drop the live channel, keep state and queue.
    pub fn suspend(&self, ws_id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(ws_id) {
            entry.sender = None;
            entry.generation += 1;
            tracing::info!(ws_id = %ws_id, "session suspended");
        }
    }

    /// Remove a session entirely.
    pub fn remove(&self, ws_id: &str) {
        self.sessions.lock().remove(ws_id);
    }

    pub fn exists(&self, ws_id: &str) -> bool {
        self.sessions.lock().contains_key(ws_id)
    }

    pub fn is_live(&self, ws_id: &str) -> bool {
        self.sessions
            .lock()
            .get(ws_id)
            .map(|e| e.sender.is_some())
            .unwrap_or(false)
    }

    /// Send an event, queueing it (drop-oldest) while suspended.
    pub async fn send_to(&self, ws_id: &str, event: ServerEvent) {
        let value = serde_json::to_value(&event).expect("event serializes");

        let sender = {
            let sessions = self.sessions.lock();
            match sessions.get(ws_id) {
                Some(entry) => entry.sender.clone(),
                None => return,
            }
        };

        match sender {
            Some(tx) => {
                if tx.send(value.clone()).await.is_err() {
                    // Writer is gone; fall back to the queue.
                    self.suspend(ws_id);
                    self.enqueue(ws_id, value);
                }
            }
            None => self.enqueue(ws_id, value),
        }
    }

    fn enqueue(&self, ws_id: &str, event: Value) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(ws_id) {
            if entry.queue.len() >= OUTBOUND_QUEUE_CAP {
                entry.queue.pop_front();
            }
            entry.queue.push_back(QueuedEvent {
                queued_at: chrono::Utc::now().to_rfc3339(),
                event,
            });
        }
    }

    /// Fan an event out to every live session.
    pub async fn broadcast(&self, event: ServerEvent) {
        let live_ids: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, e)| e.sender.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for ws_id in live_ids {
            self.send_to(&ws_id, event.clone()).await;
        }
    }

    // ── Session data ──────────────────────────────────────────────

    pub fn conversation_of(&self, ws_id: &str) -> Option<String> {
        self.sessions.lock().get(ws_id)?.conv_id.clone()
    }

    pub fn set_conversation(&self, ws_id: &str, conv_id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(ws_id) {
            entry.conv_id = Some(conv_id.to_string());
        }
    }

    pub fn force_model_of(&self, ws_id: &str) -> Option<String> {
        self.sessions.lock().get(ws_id)?.force_model.clone()
    }

    /// `"auto"` clears the override.
    pub fn set_force_model(&self, ws_id: &str, model: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(ws_id) {
            entry.force_model = if model == "auto" {
                None
            } else {
                Some(model.to_string())
            };
        }
    }

    pub fn record_pong(&self, ws_id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(ws_id) {
            entry.missed_pings = 0;
        }
    }

    pub fn queue_len(&self, ws_id: &str) -> usize {
        self.sessions
            .lock()
            .get(ws_id)
            .map(|e| e.queue.len())
            .unwrap_or(0)
    }

    fn generation_of(&self, ws_id: &str) -> Option<u64> {
        self.sessions.lock().get(ws_id).map(|e| e.generation)
    }

    /// One heartbeat tick: bump the missed counter, suspending the
    /// session after [`MAX_MISSED_PINGS`]. Returns false when the loop
    /// should stop.
    fn heartbeat_tick(&self, ws_id: &str, generation: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(ws_id) else {
            return false;
        };
        if entry.generation != generation || entry.sender.is_none() {
            return false;
        }
        if entry.missed_pings >= MAX_MISSED_PINGS {
            tracing::warn!(ws_id = %ws_id, "client missed heartbeats, suspending");
            entry.sender = None;
            entry.generation += 1;
            return false;
        }
        entry.missed_pings += 1;
        true
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection heartbeat task: ping every 30 s, suspend after three
/// unanswered pings. Exits when the connection generation changes.
pub fn spawn_heartbeat(manager: Arc<SessionManager>, ws_id: String) {
    let Some(generation) = manager.generation_of(&ws_id) else {
        return;
    };
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            if !manager.heartbeat_tick(&ws_id, generation) {
                break;
            }
            manager
                .send_to(
                    &ws_id,
                    ServerEvent::Ping {
                        timestamp: chrono::Utc::now().timestamp(),
                    },
                )
                .await;
        }
    });
}
