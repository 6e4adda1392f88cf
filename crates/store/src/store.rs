use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Retry attempts for transient (busy/locked) failures.
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub model_used: Option<String>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub conversation_id: String,
    pub text: String,
    pub messages_covered: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub domain: String,
    pub file_path: String,
    pub usage_count: u32,
    pub last_used_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    pub id: String,
    pub task_type: String,
    pub payload: Option<String>,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkItemRow {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub status: String,
    pub parent_id: Option<String>,
    pub conv_id: Option<String>,
    pub model: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Aggregate token usage across all persisted assistant messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub messages: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed access to conversations, messages, summaries, skills, tasks,
/// work items, and settings.
pub struct Store {
    db: Mutex<Connection>,
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(250))?;
        init_db(&conn)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Run `f`, retrying transient failures with exponential backoff.
    fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let db = self.db.lock().unwrap();
                f(&db)
            };
            match result {
                Err(StoreError::Transient(msg)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1));
                    tracing::warn!(attempt, backoff_ms = backoff, error = %msg, "retrying transient store error");
                    std::thread::sleep(Duration::from_millis(backoff));
                }
                other => return other,
            }
        }
    }

    // ── Conversations ─────────────────────────────────────────────

    pub fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso();
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id, title, now],
            )?;
            Ok(())
        })?;
        Ok(Conversation {
            id,
            title: title.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn list_conversations(&self, limit: u32) -> Result<Vec<Conversation>> {
        self.with_retry(|db| {
            let mut stmt = db.prepare(
                "SELECT id, title, created_at, updated_at
                 FROM conversations ORDER BY updated_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_conversation)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn get_conversation(&self, conv_id: &str) -> Result<Option<Conversation>> {
        self.with_retry(|db| {
            Ok(db
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                    params![conv_id],
                    row_to_conversation,
                )
                .optional()?)
        })
    }

    pub fn rename_conversation(&self, conv_id: &str, title: &str) -> Result<()> {
        let now = now_iso();
        self.with_retry(|db| {
            let changed = db.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, conv_id],
            )?;
            if changed == 0 {
                return Err(StoreError::Permanent(format!(
                    "conversation not found: {conv_id}"
                )));
            }
            Ok(())
        })
    }

    /// Delete a conversation plus its messages and summary in one
    /// transaction.
    pub fn delete_conversation(&self, conv_id: &str) -> Result<()> {
        self.with_retry(|db| {
            db.execute_batch("BEGIN")?;
            let result = (|| -> Result<()> {
                db.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![conv_id],
                )?;
                db.execute(
                    "DELETE FROM summaries WHERE conversation_id = ?1",
                    params![conv_id],
                )?;
                db.execute("DELETE FROM conversations WHERE id = ?1", params![conv_id])?;
                Ok(())
            })();
            match result {
                Ok(()) => {
                    db.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(e) => {
                    let _ = db.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }

    // ── Messages ──────────────────────────────────────────────────

    pub fn append_message(
        &self,
        conv_id: &str,
        role: &str,
        content: &str,
        model_used: Option<&str>,
        tokens_in: u32,
        tokens_out: u32,
    ) -> Result<MessageRow> {
        let now = now_iso();
        let id = self.with_retry(|db| {
            db.execute(
                "INSERT INTO messages
                 (conversation_id, role, content, model_used, tokens_in, tokens_out, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![conv_id, role, content, model_used, tokens_in, tokens_out, now],
            )?;
            db.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conv_id],
            )?;
            Ok(db.last_insert_rowid())
        })?;
        Ok(MessageRow {
            id,
            conversation_id: conv_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            model_used: model_used.map(String::from),
            tokens_in,
            tokens_out,
            created_at: now,
        })
    }

    /// The `limit` most recent messages, in chronological order.
    pub fn get_recent_messages(&self, conv_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_retry(|db| {
            let mut stmt = db.prepare(
                "SELECT id, conversation_id, role, content, model_used,
                        tokens_in, tokens_out, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![conv_id, limit], row_to_message)?;
            let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    /// All messages in chronological order (oldest first).
    pub fn get_all_messages(&self, conv_id: &str) -> Result<Vec<MessageRow>> {
        self.with_retry(|db| {
            let mut stmt = db.prepare(
                "SELECT id, conversation_id, role, content, model_used,
                        tokens_in, tokens_out, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![conv_id], row_to_message)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn count_messages(&self, conv_id: &str) -> Result<u32> {
        self.with_retry(|db| {
            let count: i64 = db.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conv_id],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    // ── Summaries ─────────────────────────────────────────────────

    pub fn get_summary(&self, conv_id: &str) -> Result<Option<SummaryRow>> {
        self.with_retry(|db| {
            Ok(db
                .query_row(
                    "SELECT conversation_id, text, messages_covered, created_at
                     FROM summaries WHERE conversation_id = ?1",
                    params![conv_id],
                    |row| {
                        Ok(SummaryRow {
                            conversation_id: row.get(0)?,
                            text: row.get(1)?,
                            messages_covered: row.get::<_, i64>(2)? as u32,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn save_summary(&self, conv_id: &str, text: &str, messages_covered: u32) -> Result<()> {
        let now = now_iso();
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO summaries (conversation_id, text, messages_covered, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                     text = excluded.text,
                     messages_covered = excluded.messages_covered,
                     created_at = excluded.created_at",
                params![conv_id, text, messages_covered, now],
            )?;
            Ok(())
        })
    }

    // ── Skills ────────────────────────────────────────────────────

    pub fn save_skill(
        &self,
        skill_id: &str,
        name: &str,
        description: &str,
        domain: &str,
        file_path: &str,
    ) -> Result<()> {
        let now = now_iso();
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO skills (id, name, description, domain, file_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     description = excluded.description,
                     domain = excluded.domain,
                     file_path = excluded.file_path,
                     updated_at = excluded.updated_at",
                params![skill_id, name, description, domain, file_path, now],
            )?;
            Ok(())
        })
    }

    pub fn list_skills(&self) -> Result<Vec<SkillRow>> {
        self.with_retry(|db| {
            let mut stmt = db.prepare(
                "SELECT id, name, description, domain, file_path, usage_count,
                        last_used_at, created_at, updated_at
                 FROM skills ORDER BY usage_count DESC",
            )?;
            let rows = stmt.query_map([], row_to_skill)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn find_skills_by_domain(&self, domain: &str) -> Result<Vec<SkillRow>> {
        let pattern = format!("%{domain}%");
        self.with_retry(|db| {
            let mut stmt = db.prepare(
                "SELECT id, name, description, domain, file_path, usage_count,
                        last_used_at, created_at, updated_at
                 FROM skills WHERE domain LIKE ?1 ORDER BY usage_count DESC",
            )?;
            let rows = stmt.query_map(params![pattern], row_to_skill)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn increment_skill_usage(&self, skill_id: &str) -> Result<()> {
        let now = now_iso();
        self.with_retry(|db| {
            db.execute(
                "UPDATE skills SET usage_count = usage_count + 1, last_used_at = ?1
                 WHERE id = ?2",
                params![now, skill_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_skill(&self, skill_id: &str) -> Result<()> {
        self.with_retry(|db| {
            db.execute("DELETE FROM skills WHERE id = ?1", params![skill_id])?;
            Ok(())
        })
    }

    // ── Tasks ─────────────────────────────────────────────────────

    pub fn create_task(&self, task_id: &str, task_type: &str, payload: Option<&str>) -> Result<TaskRow> {
        let now = now_iso();
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO tasks (id, type, payload, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                params![task_id, task_type, payload, now],
            )?;
            Ok(())
        })?;
        Ok(TaskRow {
            id: task_id.to_string(),
            task_type: task_type.to_string(),
            payload: payload.map(String::from),
            status: "pending".to_string(),
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// Update a task's status. `running` stamps `started_at`; terminal
    /// statuses stamp `completed_at`. A task already in a terminal
    /// status is never moved again -- such updates are no-ops.
    pub fn update_task(
        &self,
        task_id: &str,
        status: &str,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed', 'cancelled')";
        let now = now_iso();
        self.with_retry(|db| {
            let changed = match status {
                "running" => db.execute(
                    &format!(
                        "UPDATE tasks SET status = ?1, started_at = ?2,
                             result = COALESCE(?3, result), error = COALESCE(?4, error)
                         WHERE id = ?5 AND {NOT_TERMINAL}"
                    ),
                    params![status, now, result, error, task_id],
                )?,
                "completed" | "failed" | "cancelled" => db.execute(
                    &format!(
                        "UPDATE tasks SET status = ?1, completed_at = ?2,
                             result = COALESCE(?3, result), error = COALESCE(?4, error)
                         WHERE id = ?5 AND {NOT_TERMINAL}"
                    ),
                    params![status, now, result, error, task_id],
                )?,
                _ => db.execute(
                    &format!(
                        "UPDATE tasks SET status = ?1,
                             result = COALESCE(?2, result), error = COALESCE(?3, error)
                         WHERE id = ?4 AND {NOT_TERMINAL}"
                    ),
                    params![status, result, error, task_id],
                )?,
            };
            if changed == 0 {
                let exists: i64 = db.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(StoreError::Permanent(format!("task not found: {task_id}")));
                }
                tracing::debug!(task_id, status, "ignoring status update on terminal task");
            }
            Ok(())
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRow>> {
        self.with_retry(|db| {
            Ok(db
                .query_row(
                    "SELECT id, type, payload, status, result, error,
                            created_at, started_at, completed_at
                     FROM tasks WHERE id = ?1",
                    params![task_id],
                    row_to_task,
                )
                .optional()?)
        })
    }

    pub fn list_tasks(&self, status: Option<&str>) -> Result<Vec<TaskRow>> {
        self.with_retry(|db| {
            let (sql, has_filter) = match status {
                Some(_) => (
                    "SELECT id, type, payload, status, result, error,
                            created_at, started_at, completed_at
                     FROM tasks WHERE status = ?1 ORDER BY created_at DESC",
                    true,
                ),
                None => (
                    "SELECT id, type, payload, status, result, error,
                            created_at, started_at, completed_at
                     FROM tasks ORDER BY created_at DESC",
                    false,
                ),
            };
            let mut stmt = db.prepare(sql)?;
            let rows = if has_filter {
                stmt.query_map(params![status.unwrap()], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                stmt.query_map([], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok(rows)
        })
    }

    // ── Work items ────────────────────────────────────────────────

    pub fn upsert_work_item(&self, item: &WorkItemRow) -> Result<()> {
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO work_items
                 (id, kind, title, status, parent_id, conv_id, model, metadata,
                  created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     status = excluded.status,
                     metadata = excluded.metadata,
                     started_at = excluded.started_at,
                     completed_at = excluded.completed_at",
                params![
                    item.id,
                    item.kind,
                    item.title,
                    item.status,
                    item.parent_id,
                    item.conv_id,
                    item.model,
                    item.metadata,
                    item.created_at,
                    item.started_at,
                    item.completed_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_work_item_status(&self, item_id: &str, status: &str) -> Result<()> {
        let now = now_iso();
        self.with_retry(|db| {
            match status {
                "running" => db.execute(
                    "UPDATE work_items SET status = ?1,
                         started_at = COALESCE(started_at, ?2)
                     WHERE id = ?3",
                    params![status, now, item_id],
                )?,
                "completed" | "failed" | "cancelled" => db.execute(
                    "UPDATE work_items SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![status, now, item_id],
                )?,
                _ => db.execute(
                    "UPDATE work_items SET status = ?1 WHERE id = ?2",
                    params![status, item_id],
                )?,
            };
            Ok(())
        })
    }

    pub fn get_work_item(&self, item_id: &str) -> Result<Option<WorkItemRow>> {
        self.with_retry(|db| {
            Ok(db
                .query_row(
                    "SELECT id, kind, title, status, parent_id, conv_id, model, metadata,
                            created_at, started_at, completed_at
                     FROM work_items WHERE id = ?1",
                    params![item_id],
                    row_to_work_item,
                )
                .optional()?)
        })
    }

    pub fn list_work_items(&self, status: Option<&str>) -> Result<Vec<WorkItemRow>> {
        self.with_retry(|db| {
            let rows = match status {
                Some(s) => {
                    let mut stmt = db.prepare(
                        "SELECT id, kind, title, status, parent_id, conv_id, model, metadata,
                                created_at, started_at, completed_at
                         FROM work_items WHERE status = ?1 ORDER BY created_at DESC",
                    )?;
                    let result = stmt
                        .query_map(params![s], row_to_work_item)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    result
                }
                None => {
                    let mut stmt = db.prepare(
                        "SELECT id, kind, title, status, parent_id, conv_id, model, metadata,
                                created_at, started_at, completed_at
                         FROM work_items ORDER BY created_at DESC",
                    )?;
                    let result = stmt
                        .query_map([], row_to_work_item)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    result
                }
            };
            Ok(rows)
        })
    }

    // ── Settings ──────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<(String, bool)>> {
        self.with_retry(|db| {
            Ok(db
                .query_row(
                    "SELECT value, encrypted FROM settings WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
                )
                .optional()?)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str, encrypted: bool) -> Result<()> {
        self.with_retry(|db| {
            db.execute(
                "INSERT INTO settings (key, value, encrypted) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                encrypted = excluded.encrypted",
                params![key, value, encrypted as i64],
            )?;
            Ok(())
        })
    }

    /// Atomic multi-key write: either all entries land or none do.
    pub fn set_settings_many(&self, entries: &[(String, String, bool)]) -> Result<()> {
        self.with_retry(|db| {
            db.execute_batch("BEGIN")?;
            let result = (|| -> Result<()> {
                for (key, value, encrypted) in entries {
                    db.execute(
                        "INSERT INTO settings (key, value, encrypted) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                        encrypted = excluded.encrypted",
                        params![key, value, *encrypted as i64],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    db.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(e) => {
                    let _ = db.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }

    pub fn all_settings(&self) -> Result<Vec<(String, String, bool)>> {
        self.with_retry(|db| {
            let mut stmt = db.prepare("SELECT key, value, encrypted FROM settings")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // ── Aggregates & health ───────────────────────────────────────

    pub fn usage_totals(&self) -> Result<UsageTotals> {
        self.with_retry(|db| {
            db.query_row(
                "SELECT COUNT(*), COALESCE(SUM(tokens_in), 0), COALESCE(SUM(tokens_out), 0)
                 FROM messages WHERE role = 'assistant'",
                [],
                |row| {
                    Ok(UsageTotals {
                        messages: row.get::<_, i64>(0)? as u64,
                        tokens_in: row.get::<_, i64>(1)? as u64,
                        tokens_out: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .map_err(StoreError::from)
        })
    }

    /// Raw liveness probe.
    pub fn health_check(&self) -> Result<()> {
        self.with_retry(|db| {
            db.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mappers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        model_used: row.get(4)?,
        tokens_in: row.get::<_, i64>(5)? as u32,
        tokens_out: row.get::<_, i64>(6)? as u32,
        created_at: row.get(7)?,
    })
}

fn row_to_skill(row: &rusqlite::Row<'_>) -> rusqlite::Result<SkillRow> {
    Ok(SkillRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        domain: row.get(3)?,
        file_path: row.get(4)?,
        usage_count: row.get::<_, i64>(5)? as u32,
        last_used_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        task_type: row.get(1)?,
        payload: row.get(2)?,
        status: row.get(3)?,
        result: row.get(4)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn row_to_work_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkItemRow> {
    Ok(WorkItemRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        parent_id: row.get(4)?,
        conv_id: row.get(5)?,
        model: row.get(6)?,
        metadata: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
