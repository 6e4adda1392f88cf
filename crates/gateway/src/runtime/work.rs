//! Unified work registry -- the single source of truth for all active
//! work items: agent runs, plans, tasks, reminders.
//!
//! The in-memory cache holds non-terminal items for fast reads; the
//! Store is the durable mirror. Every register/update emits a change
//! event on a broadcast channel (lagging subscribers lose oldest
//! events) which the transport layer fans out to live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use hearth_store::{Store, WorkItemRow};

const EVENT_CHANNEL_CAP: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    AgentRun,
    Plan,
    PlanStep,
    SubAgent,
    Task,
    Reminder,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::AgentRun => "agent_run",
            WorkKind::Plan => "plan",
            WorkKind::PlanStep => "plan_step",
            WorkKind::SubAgent => "sub_agent",
            WorkKind::Task => "task",
            WorkKind::Reminder => "reminder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Running => "running",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: WorkKind,
    pub title: String,
    pub status: WorkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conv_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// A change event broadcast to observers and the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct WorkEvent {
    /// `registered` or `updated`.
    pub event: String,
    pub item: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkCounts {
    pub pending: usize,
    pub running: usize,
    pub total: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkRegistry {
    items: RwLock<HashMap<String, WorkItem>>,
    store: Arc<Store>,
    events: broadcast::Sender<WorkEvent>,
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl WorkRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Self {
            items: RwLock::new(HashMap::new()),
            store,
            events,
        }
    }

    /// Subscribe to change events. Slow consumers lag and lose the
    /// oldest events rather than blocking emitters.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkEvent> {
        self.events.subscribe()
    }

    /// Register a new work item (or refresh an existing one).
    pub fn register(
        &self,
        item_id: &str,
        kind: WorkKind,
        title: &str,
        status: WorkStatus,
        parent_id: Option<&str>,
        conv_id: Option<&str>,
        model: Option<&str>,
        metadata: Option<Value>,
    ) -> WorkItem {
        let now = now_iso();
        let item = WorkItem {
            id: item_id.to_string(),
            kind,
            title: title.to_string(),
            status,
            parent_id: parent_id.map(String::from),
            conv_id: conv_id.map(String::from),
            model: model.map(String::from),
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_at: now.clone(),
            started_at: (status == WorkStatus::Running).then(|| now.clone()),
            completed_at: None,
        };

        self.items.write().insert(item_id.to_string(), item.clone());
        self.persist(&item);
        self.emit("registered", &item);
        item
    }

    /// Update an item's status. A terminal status is never overwritten;
    /// on becoming terminal the cache entry is evicted after emission
    /// and the Store remains the sole record.
    pub fn update(
        &self,
        item_id: &str,
        status: WorkStatus,
        metadata_patch: Option<Value>,
    ) -> Option<WorkItem> {
        let updated = {
            let mut items = self.items.write();
            match items.get_mut(item_id) {
                Some(item) => {
                    if item.status.is_terminal() {
                        tracing::warn!(
                            item = item_id,
                            current = item.status.as_str(),
                            requested = status.as_str(),
                            "ignoring status update on terminal work item"
                        );
                        return Some(item.clone());
                    }
                    let now = now_iso();
                    item.status = status;
                    if status == WorkStatus::Running && item.started_at.is_none() {
                        item.started_at = Some(now.clone());
                    }
                    if status.is_terminal() {
                        item.completed_at = Some(now);
                    }
                    if let (Value::Object(meta), Some(Value::Object(patch))) =
                        (&mut item.metadata, metadata_patch)
                    {
                        for (k, v) in patch {
                            meta.insert(k, v);
                        }
                    }
                    Some(item.clone())
                }
                None => None,
            }
        };

        let Some(item) = updated else {
            // Evicted (or never cached): the Store is authoritative.
            // Refuse regressions from a terminal record.
            match self.store.get_work_item(item_id) {
                Ok(Some(row)) if is_terminal_str(&row.status) => {
                    tracing::warn!(
                        item = item_id,
                        current = %row.status,
                        requested = status.as_str(),
                        "ignoring status update on terminal work item"
                    );
                }
                _ => {
                    if let Err(e) = self.store.update_work_item_status(item_id, status.as_str()) {
                        tracing::debug!(item = item_id, error = %e, "store update for non-cached work item failed");
                    }
                    let minimal = serde_json::json!({"id": item_id, "status": status.as_str()});
                    let _ = self.events.send(WorkEvent {
                        event: "updated".into(),
                        item: minimal,
                    });
                }
            }
            return None;
        };

        self.persist(&item);
        self.emit("updated", &item);

        if item.status.is_terminal() {
            self.items.write().remove(item_id);
        }
        Some(item)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get(&self, item_id: &str) -> Option<WorkItem> {
        self.items.read().get(item_id).cloned()
    }

    pub fn all_active(&self) -> Vec<WorkItem> {
        self.items.read().values().cloned().collect()
    }

    pub fn by_kind(&self, kind: WorkKind) -> Vec<WorkItem> {
        self.items
            .read()
            .values()
            .filter(|i| i.kind == kind)
            .cloned()
            .collect()
    }

    pub fn children_of(&self, parent_id: &str) -> Vec<WorkItem> {
        self.items
            .read()
            .values()
            .filter(|i| i.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> WorkCounts {
        let items = self.items.read();
        let mut counts = WorkCounts {
            total: items.len(),
            ..Default::default()
        };
        for item in items.values() {
            match item.status {
                WorkStatus::Pending => counts.pending += 1,
                WorkStatus::Running => counts.running += 1,
                _ => {}
            }
        }
        counts
    }

    // ── Internals ─────────────────────────────────────────────────

    fn persist(&self, item: &WorkItem) {
        let row = WorkItemRow {
            id: item.id.clone(),
            kind: item.kind.as_str().to_string(),
            title: item.title.clone(),
            status: item.status.as_str().to_string(),
            parent_id: item.parent_id.clone(),
            conv_id: item.conv_id.clone(),
            model: item.model.clone(),
            metadata: serde_json::to_string(&item.metadata).ok(),
            created_at: item.created_at.clone(),
            started_at: item.started_at.clone(),
            completed_at: item.completed_at.clone(),
        };
        if let Err(e) = self.store.upsert_work_item(&row) {
            tracing::warn!(item = %item.id, error = %e, "work item persist failed");
        }
    }

    fn emit(&self, event: &str, item: &WorkItem) {
        let _ = self.events.send(WorkEvent {
            event: event.to_string(),
            item: serde_json::to_value(item).unwrap_or(Value::Null),
        });
    }
}

fn is_terminal_str(status: &str) -> bool {
    matches!(status, "completed" | "failed" | "cancelled")
}
