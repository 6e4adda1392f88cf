//! Background task queue -- semaphore-bounded, in-process, non-durable.
//!
//! Handlers are registered by task type at startup. Submission records
//! a pending row in the Store and returns immediately; execution takes
//! a semaphore permit. Crashes lose in-flight tasks by design.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use hearth_domain::error::{Error, Result};
use hearth_store::{Store, TaskRow};

/// An async handler for one task type. Returns an optional result
/// string or an error message.
pub type TaskHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Option<String>, String>> + Send + Sync>;

pub struct TaskQueue {
    store: Arc<Store>,
    semaphore: Arc<Semaphore>,
    handlers: RwLock<HashMap<String, TaskHandler>>,
    running: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>,
}

impl TaskQueue {
    pub fn new(store: Arc<Store>, max_concurrent: usize) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(max_concurrent.clamp(1, 64))),
            handlers: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a handler for a task type.
    pub fn register_handler(&self, task_type: &str, handler: TaskHandler) {
        tracing::info!(task_type, "registered task handler");
        self.handlers.write().insert(task_type.to_string(), handler);
    }

    /// Submit a task. Returns the persisted record immediately; the
    /// handler runs in the background under the concurrency cap.
    pub fn submit(self: &Arc<Self>, task_type: &str, payload: Value) -> Result<TaskRow> {
        let handler = self
            .handlers
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown task type: {task_type}")))?;

        let task_id = format!("task-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let payload_json = serde_json::to_string(&payload)?;
        let record = self
            .store
            .create_task(&task_id, task_type, Some(&payload_json))
            .map_err(Error::from)?;

        let queue = self.clone();
        let id = task_id.clone();
        let task_type = task_type.to_string();
        let handle = tokio::spawn(async move {
            queue.execute(&id, &task_type, handler, payload).await;
        });
        self.running.lock().insert(task_id, handle);

        Ok(record)
    }

    async fn execute(&self, task_id: &str, task_type: &str, handler: TaskHandler, payload: Value) {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("task semaphore is never closed");

        if let Err(e) = self.store.update_task(task_id, "running", None, None) {
            tracing::warn!(task_id, error = %e, "failed to mark task running");
        }
        tracing::info!(task_id, task_type, "running task");

        let outcome = handler(payload).await;
        match outcome {
            Ok(result) => {
                if let Err(e) =
                    self.store
                        .update_task(task_id, "completed", result.as_deref(), None)
                {
                    tracing::warn!(task_id, error = %e, "failed to mark task completed");
                }
                tracing::info!(task_id, "task completed");
            }
            Err(message) => {
                tracing::error!(task_id, error = %message, "task failed");
                let _ = self
                    .store
                    .update_task(task_id, "failed", None, Some(&message));
            }
        }

        self.running.lock().remove(task_id);
    }

    /// Cancel an in-flight task. Returns true when a running task was
    /// found and aborted.
    pub fn cancel(&self, task_id: &str) -> bool {
        // Already terminal: nothing to cancel, whatever the handle map says.
        if let Ok(Some(task)) = self.store.get_task(task_id) {
            if matches!(task.status.as_str(), "completed" | "failed" | "cancelled") {
                return false;
            }
        }
        let handle = self.running.lock().remove(task_id);
        match handle {
            Some(handle) => {
                handle.abort();
                if let Err(e) = self.store.update_task(task_id, "cancelled", None, None) {
                    tracing::warn!(task_id, error = %e, "failed to mark task cancelled");
                }
                tracing::info!(task_id, "task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn list(&self, status: Option<&str>) -> Result<Vec<TaskRow>> {
        Ok(self.store.list_tasks(status)?)
    }

    pub fn active_count(&self) -> usize {
        self.running.lock().len()
    }
}
