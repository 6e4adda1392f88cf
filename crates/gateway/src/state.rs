use std::sync::Arc;

use parking_lot::RwLock;

use hearth_providers::ModelRouter;
use hearth_store::Store;
use hearth_tools::ToolInvoker;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::tasks::TaskQueue;
use crate::runtime::work::WorkRegistry;
use crate::session::SessionManager;
use crate::settings::ConfigRegistry;

/// Shared application state handed to the socket handlers and runtime.
///
/// The router sits behind a lock so settings changes can rebuild it
/// atomically; in-flight turns keep the `Arc` they captured.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<ConfigRegistry>,
    pub router: Arc<RwLock<Arc<ModelRouter>>>,
    pub invoker: Arc<ToolInvoker>,
    pub sessions: Arc<SessionManager>,
    pub work: Arc<WorkRegistry>,
    pub tasks: Arc<TaskQueue>,
    pub cancel_map: Arc<CancelMap>,
    pub session_locks: Arc<SessionLockMap>,
}

impl AppState {
    /// The router as of this moment; later swaps don't affect the
    /// returned reference.
    pub fn current_router(&self) -> Arc<ModelRouter> {
        self.router.read().clone()
    }

    /// Swap in a rebuilt router.
    pub fn swap_router(&self, router: Arc<ModelRouter>) {
        *self.router.write() = router;
    }
}
