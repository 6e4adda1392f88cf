//! Startup sequence -- explicit construction of every service, in
//! dependency order: cipher -> store -> config -> router -> skills ->
//! tools -> work registry -> task queue -> sessions. Teardown is the
//! reverse (drop order).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;

use hearth_providers::{AnthropicClient, ModelClient, ModelRouter, OllamaClient};
use hearth_skills::{load_skills, ScriptSkillEngine};
use hearth_store::{SecretCipher, Store};
use hearth_tools::{ToolInvoker, ToolRegistry};

use crate::plugins::{ClockPlugin, FilesPlugin, WebPlugin};
use crate::runtime::cancel::CancelMap;
use crate::runtime::context;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::tasks::TaskQueue;
use crate::runtime::work::WorkRegistry;
use crate::session::{ServerEvent, SessionManager};
use crate::settings::ConfigRegistry;
use crate::state::AppState;

pub struct BootstrapOptions {
    pub data_dir: PathBuf,
    pub skills_dir: PathBuf,
}

/// Build the model router from the current settings.
pub fn build_router(config: &ConfigRegistry) -> Arc<ModelRouter> {
    let mut clients: Vec<Arc<dyn ModelClient>> = Vec::new();

    match OllamaClient::new(
        &config.get_or_default("ollama_base_url"),
        &config.get_or_default("ollama_model"),
    ) {
        Ok(client) => clients.push(Arc::new(client)),
        Err(e) => tracing::warn!(error = %e, "local client unavailable"),
    }

    let api_key = config.get_or_default("anthropic_api_key");
    match AnthropicClient::new(&api_key, &config.get_or_default("claude_model")) {
        Ok(client) => clients.push(Arc::new(client)),
        Err(e) => tracing::warn!(error = %e, "hosted client unavailable"),
    }

    let threshold = config
        .get_int("complexity_threshold")
        .unwrap_or(50)
        .clamp(0, 100) as u8;

    Arc::new(ModelRouter::new(clients, threshold))
}

/// Construct the full application state and wire the cross-service
/// plumbing (router rebuild subscription, work-event broadcast, task
/// handlers).
pub async fn build_state(opts: BootstrapOptions) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&opts.data_dir)
        .with_context(|| format!("creating data dir {}", opts.data_dir.display()))?;

    let cipher = Arc::new(
        SecretCipher::load_or_generate(&opts.data_dir).context("loading encryption key")?,
    );
    let store = Arc::new(Store::open(&opts.data_dir.join("hearth.db")).context("opening store")?);
    let config = ConfigRegistry::new(store.clone(), cipher).context("loading settings")?;

    let router = Arc::new(RwLock::new(build_router(&config)));

    // Skills: load manifests, mirror the catalog into the Store, and
    // stand up the script engine for the ones that are configured.
    let manifests = load_skills(&opts.skills_dir);
    for manifest in &manifests {
        if let Err(e) = store.save_skill(
            &manifest.id,
            &manifest.name,
            &manifest.description,
            &manifest.domain,
            &manifest.dir.to_string_lossy(),
        ) {
            tracing::warn!(skill = %manifest.id, error = %e, "failed to mirror skill into store");
        }
    }
    let skill_engine = Arc::new(ScriptSkillEngine::new(manifests, &config.snapshot()));

    let mut registry = ToolRegistry::new();
    registry.register_plugin(Arc::new(ClockPlugin));
    match WebPlugin::new() {
        Ok(web) => registry.register_plugin(Arc::new(web)),
        Err(e) => tracing::warn!(error = %e, "web plugin disabled"),
    }
    registry.register_plugin(Arc::new(FilesPlugin::new(vec![opts.data_dir.clone()])));
    registry.set_skill_engine(skill_engine);
    let invoker = Arc::new(ToolInvoker::new(Arc::new(registry)));

    let work = Arc::new(WorkRegistry::new(store.clone()));

    let max_tasks = config.get_int("max_research_tasks").unwrap_or(5).max(1) as usize;
    let tasks = Arc::new(TaskQueue::new(store.clone(), max_tasks));

    let sessions = Arc::new(SessionManager::new());

    let state = AppState {
        store: store.clone(),
        config: config.clone(),
        router,
        invoker,
        sessions: sessions.clone(),
        work: work.clone(),
        tasks: tasks.clone(),
        cancel_map: Arc::new(CancelMap::new()),
        session_locks: Arc::new(SessionLockMap::new()),
    };

    register_summarize_handler(&state);
    wire_router_rebuild(&state);
    wire_work_broadcast(work, sessions);

    Ok(state)
}

/// Background summarization task: summarize everything older than the
/// recent window with the cheapest available client.
fn register_summarize_handler(state: &AppState) {
    let store = state.store.clone();
    let router_slot = state.router.clone();
    state.tasks.register_handler(
        "summarize_conversation",
        Arc::new(move |payload| {
            let store = store.clone();
            let router = router_slot.read().clone();
            Box::pin(async move {
                let conv_id = payload
                    .get("conv_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "missing conv_id".to_string())?
                    .to_string();
                let client = router
                    .cheapest_available()
                    .await
                    .ok_or_else(|| "no model available for summarization".to_string())?;
                context::generate_summary(&store, client, &conv_id).await?;
                Ok(None)
            })
        }),
    );
}

/// Model-related setting changes rebuild the router and swap it in
/// atomically; in-flight turns keep their captured reference.
fn wire_router_rebuild(state: &AppState) {
    let config = state.config.clone();
    let router_slot = state.router.clone();
    state.config.subscribe(
        hearth_domain::settings::MODEL_KEYS,
        Arc::new(move |key, _old, _new| {
            tracing::info!(key, "model setting changed, rebuilding router");
            let rebuilt = build_router(&config);
            *router_slot.write() = rebuilt;
        }),
    );
}

/// Fan work-registry change events out to every live session.
fn wire_work_broadcast(work: Arc<WorkRegistry>, sessions: Arc<SessionManager>) {
    let mut rx = work.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    sessions
                        .broadcast(ServerEvent::WorkItemUpdate {
                            event: event.event,
                            item: event.item,
                        })
                        .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "work event broadcast lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
