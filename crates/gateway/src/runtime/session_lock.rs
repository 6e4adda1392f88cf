//! Per-session turn serialization.
//!
//! Turns on one session run one at a time; turns on different sessions
//! run concurrently. Each session key maps to a `Semaphore(1)` whose
//! permit is held for the duration of the turn.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a session; held until dropped.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session lock semaphore is never closed")
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks for sessions with no turn in flight.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}
