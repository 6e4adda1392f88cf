//! The tool-loop executor -- one instance per user turn.
//!
//! Streams a model round, collects tool calls, executes them
//! sequentially, feeds results back, and loops until a round produces
//! no tool calls, the circuit breaker trips, or the round cap is hit.
//! Exactly one `stream_start`/`stream_end` pair is emitted per turn,
//! on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use hearth_domain::chat::{Message, ToolCall, ToolResult};
use hearth_domain::error::Error;
use hearth_domain::stream::{StreamChunk, Usage};
use hearth_providers::{ChatRequest, ClientKind, ModelClient};

use crate::session::ServerEvent;
use crate::state::AppState;

use super::cancel::CancelToken;
use super::context;
use super::formatter::{build_followup, parse_legacy_tool_calls, ToolDialect};
use super::truncate::truncate_tool_result;
use super::work::{WorkKind, WorkStatus};
use super::{build_system_prompt, truncate_str};

/// Maximum tool rounds before the loop force-stops. The forced
/// synthesis round of the circuit breaker may add one more model call.
pub const MAX_ROUNDS: u32 = 5;

/// Stream chunks are buffered and flushed at this cadence (or at the
/// first tool_use chunk).
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

const APOLOGY: &str =
    "I ran into a problem finishing that request. Please try again in a moment.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one turn.
pub struct TurnInput {
    pub ws_id: String,
    pub conv_id: String,
    pub user_message: String,
}

struct TurnOutcome {
    text: String,
    usage: Usage,
    model: String,
    rounds: u32,
}

struct TurnFailure {
    error: Error,
    /// Text accumulated before the failure.
    partial: String,
    /// Whether `stream_start` was already emitted.
    stream_started: bool,
    model: String,
}

impl TurnFailure {
    fn early(error: Error) -> Self {
        Self {
            error,
            partial: String::new(),
            stream_started: false,
            model: String::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn -- orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one full turn. The caller holds the session lock.
pub async fn run_turn(state: &AppState, input: TurnInput) {
    let run_id = format!("run-{}", &Uuid::new_v4().simple().to_string()[..8]);
    state.work.register(
        &run_id,
        WorkKind::AgentRun,
        &truncate_str(&input.user_message, 80),
        WorkStatus::Running,
        None,
        Some(&input.conv_id),
        None,
        None,
    );
    let cancel = state.cancel_map.register(&input.ws_id);

    tracing::info!(ws_id = %input.ws_id, conv_id = %input.conv_id, run_id = %run_id, "turn started");
    let result = run_turn_inner(state, &input, &cancel, &run_id).await;
    state.cancel_map.remove(&input.ws_id);

    if let Err(failure) = result {
        // Close the stream pair before surfacing the error.
        if failure.stream_started {
            state
                .sessions
                .send_to(
                    &input.ws_id,
                    ServerEvent::StreamEnd {
                        model: failure.model.clone(),
                    },
                )
                .await;
        }
        state
            .sessions
            .send_to(
                &input.ws_id,
                ServerEvent::Error {
                    category: failure.error.category().to_string(),
                    message: failure.error.to_string(),
                },
            )
            .await;

        let status = if matches!(failure.error, Error::Aborted) {
            WorkStatus::Cancelled
        } else {
            WorkStatus::Failed
        };
        state.work.update(
            &run_id,
            status,
            Some(serde_json::json!({"error": failure.error.to_string()})),
        );

        // A turn that produced no partial output leaves a brief apology
        // in the conversation (not for user-initiated aborts).
        if failure.partial.is_empty() && !matches!(failure.error, Error::Aborted) {
            if let Err(e) = state
                .store
                .append_message(&input.conv_id, "assistant", APOLOGY, None, 0, 0)
            {
                tracing::warn!(error = %e, "failed to persist apology message");
            }
        }
        tracing::warn!(run_id = %run_id, error = %failure.error, "turn failed");
    }
}

async fn run_turn_inner(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancelToken,
    run_id: &str,
) -> Result<(), TurnFailure> {
    // Context first (so the new message isn't doubled), then persist
    // the user message.
    let messages = context::build_context(&state.store, &input.conv_id, &input.user_message)
        .map_err(|e| TurnFailure::early(e.into()))?;
    state
        .store
        .append_message(&input.conv_id, "user", &input.user_message, None, 0, 0)
        .map_err(|e| TurnFailure::early(e.into()))?;

    schedule_summary_refresh(state, &input.conv_id);

    let system = build_system_prompt(&state.config.get_or_default("persona_tone"));
    let mode = state.config.get_or_default("tool_calling_mode");

    let router = state.current_router();
    let force = state.sessions.force_model_of(&input.ws_id);
    let client = router
        .select(&input.user_message, force.as_deref())
        .await
        .map_err(TurnFailure::early)?;

    context::check_context_fits(&messages, &system, client.context_window());

    let outcome = match run_attempt(state, input, cancel, client.clone(), &mode, messages.clone(), &system).await
    {
        Ok(outcome) => outcome,
        // One router-level retry when the client never produced output.
        Err(failure) if failure.error.is_retriable() && !failure.stream_started => {
            let Some(fallback) = router.fallback_for(client.name()).await else {
                return Err(failure);
            };
            tracing::warn!(
                from = client.name(),
                to = fallback.name(),
                error = %failure.error,
                "client failed before streaming, retrying on fallback"
            );
            run_attempt(state, input, cancel, fallback, &mode, messages, &system).await?
        }
        Err(failure) => return Err(failure),
    };

    finalize(state, input, run_id, outcome).await
}

async fn finalize(
    state: &AppState,
    input: &TurnInput,
    run_id: &str,
    outcome: TurnOutcome,
) -> Result<(), TurnFailure> {
    state
        .sessions
        .send_to(
            &input.ws_id,
            ServerEvent::StreamEnd {
                model: outcome.model.clone(),
            },
        )
        .await;

    if let Err(e) = state.store.append_message(
        &input.conv_id,
        "assistant",
        &outcome.text,
        Some(&outcome.model),
        outcome.usage.tokens_in,
        outcome.usage.tokens_out,
    ) {
        tracing::error!(error = %e, "failed to persist assistant message");
    }

    state.work.update(
        run_id,
        WorkStatus::Completed,
        Some(serde_json::json!({
            "rounds": outcome.rounds,
            "tokens_in": outcome.usage.tokens_in,
            "tokens_out": outcome.usage.tokens_out,
            "model": outcome.model,
        })),
    );
    tracing::info!(
        run_id,
        model = %outcome.model,
        rounds = outcome.rounds,
        chars = outcome.text.len(),
        "turn completed"
    );
    Ok(())
}

/// Kick off a background summary refresh when the conversation has
/// grown enough. Never blocks the turn.
fn schedule_summary_refresh(state: &AppState, conv_id: &str) {
    let total = match state.store.count_messages(conv_id) {
        Ok(t) => t,
        Err(_) => return,
    };
    let summary = state.store.get_summary(conv_id).ok().flatten();
    if context::needs_summary_refresh(total, summary.as_ref()) {
        match state
            .tasks
            .submit("summarize_conversation", serde_json::json!({"conv_id": conv_id}))
        {
            Ok(task) => tracing::debug!(conv_id, task_id = %task.id, "scheduled summary refresh"),
            Err(e) => tracing::warn!(conv_id, error = %e, "failed to schedule summary refresh"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_attempt -- the tool loop against one client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_attempt(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancelToken,
    client: Arc<dyn ModelClient>,
    mode: &str,
    mut messages: Vec<Message>,
    system: &str,
) -> Result<TurnOutcome, TurnFailure> {
    let dialect = ToolDialect::pick(mode, client.kind());
    let tools: Option<Vec<Value>> = if dialect.uses_native_tools() {
        let registry = state.invoker.registry();
        let schemas = match dialect {
            ToolDialect::AnthropicBlocks => registry.to_native_tools(),
            _ => registry.to_openai_tools(),
        };
        (!schemas.is_empty()).then_some(schemas)
    } else {
        None
    };

    let mut round: u32 = 0;
    let mut prev_names: Vec<String> = Vec::new();
    let mut total_usage = Usage::default();
    let mut stream_started = false;
    let model = client.name().to_string();

    let failure_model = model.clone();
    let failure = move |error: Error, partial: &str, started: bool| TurnFailure {
        error,
        partial: partial.to_string(),
        stream_started: started,
        model: failure_model.clone(),
    };

    loop {
        if cancel.is_cancelled() {
            return Err(failure(Error::Aborted, "", stream_started));
        }

        // Local models over-chain tool calls; from round 2, withhold
        // the schemas to force synthesis.
        let suppress_tools = client.kind() == ClientKind::Local && round >= 2;

        let (text, mut calls, usage) = stream_round(
            state,
            &input.ws_id,
            cancel,
            client.as_ref(),
            &messages,
            system,
            &tools,
            suppress_tools,
            &mut stream_started,
        )
        .await
        .map_err(|e| failure(e, "", stream_started))?;
        total_usage.add(&usage);

        if dialect == ToolDialect::LegacyText && calls.is_empty() {
            calls = parse_legacy_tool_calls(&text);
        }

        // A round with no tool calls is the final answer.
        if calls.is_empty() {
            return Ok(TurnOutcome {
                text,
                usage: total_usage,
                model,
                rounds: round + 1,
            });
        }

        let results = execute_tools(state, input, cancel, &calls)
            .await
            .map_err(|e| failure(e, &text, stream_started))?;

        let mut names: Vec<String> = calls.iter().map(|c| c.full_name()).collect();
        names.sort();

        // Circuit breaker: the same tool multiset two rounds in a row
        // earns one forced synthesis round, then we stop.
        if !prev_names.is_empty() && names == prev_names {
            tracing::warn!(
                ws_id = %input.ws_id,
                tools = ?names,
                "circuit breaker tripped, forcing synthesis"
            );
            round += 1;
            messages.extend(build_followup(dialect, &text, &calls, &results, round));
            let synthesis = stream_round(
                state,
                &input.ws_id,
                cancel,
                client.as_ref(),
                &messages,
                system,
                &tools,
                true,
                &mut stream_started,
            )
            .await;
            return match synthesis {
                Ok((syn_text, _, syn_usage)) => {
                    total_usage.add(&syn_usage);
                    Ok(TurnOutcome {
                        text: syn_text,
                        usage: total_usage,
                        model,
                        rounds: round + 1,
                    })
                }
                Err(Error::Aborted) => Err(failure(Error::Aborted, &text, stream_started)),
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis round failed, keeping last text");
                    Ok(TurnOutcome {
                        text,
                        usage: total_usage,
                        model,
                        rounds: round + 1,
                    })
                }
            };
        }
        prev_names = names;

        round += 1;
        if round > MAX_ROUNDS {
            tracing::warn!(ws_id = %input.ws_id, "hit max tool rounds ({MAX_ROUNDS})");
            return Ok(TurnOutcome {
                text,
                usage: total_usage,
                model,
                rounds: round,
            });
        }

        state
            .sessions
            .send_to(
                &input.ws_id,
                ServerEvent::ToolStatus {
                    status: "complete".into(),
                    tool: None,
                    count: Some(results.len()),
                },
            )
            .await;

        // Truncate oversized results against the client's window.
        let window = client.context_window();
        let num_results = results.len();
        let truncated: Vec<ToolResult> = results
            .into_iter()
            .map(|mut r| {
                if let Some(output) = r.output.take() {
                    r.output = Some(truncate_tool_result(&output, window, num_results));
                }
                r
            })
            .collect();

        messages.extend(build_followup(dialect, &text, &calls, &truncated, round));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming and tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One streaming round. Emits `stream_start` the first time a stream
/// is established; buffers text and flushes every 100 ms or at the
/// first tool_use chunk.
#[allow(clippy::too_many_arguments)]
async fn stream_round(
    state: &AppState,
    ws_id: &str,
    cancel: &CancelToken,
    client: &dyn ModelClient,
    messages: &[Message],
    system: &str,
    tools: &Option<Vec<Value>>,
    suppress_tools: bool,
    stream_started: &mut bool,
) -> Result<(String, Vec<ToolCall>, Usage), Error> {
    let req = ChatRequest {
        messages: messages.to_vec(),
        system: Some(system.to_string()),
        tools: if suppress_tools { None } else { tools.clone() },
    };

    let mut stream = client.chat_stream(&req).await?;

    if !*stream_started {
        *stream_started = true;
        state
            .sessions
            .send_to(
                ws_id,
                ServerEvent::StreamStart {
                    model: client.name().to_string(),
                },
            )
            .await;
    }

    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    let mut usage = Usage::default();
    let mut buffer = String::new();
    let mut last_flush = Instant::now();

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            if !buffer.is_empty() {
                state
                    .sessions
                    .send_to(ws_id, ServerEvent::StreamChunk { content: buffer })
                    .await;
            }
            return Err(Error::Aborted);
        }

        match item? {
            StreamChunk::Text { delta } => {
                text.push_str(&delta);
                buffer.push_str(&delta);
                if last_flush.elapsed() >= FLUSH_INTERVAL {
                    state
                        .sessions
                        .send_to(
                            ws_id,
                            ServerEvent::StreamChunk {
                                content: std::mem::take(&mut buffer),
                            },
                        )
                        .await;
                    last_flush = Instant::now();
                }
            }
            StreamChunk::ToolUse { id, name, input } => {
                if !buffer.is_empty() {
                    state
                        .sessions
                        .send_to(
                            ws_id,
                            ServerEvent::StreamChunk {
                                content: std::mem::take(&mut buffer),
                            },
                        )
                        .await;
                    last_flush = Instant::now();
                }
                calls.push(ToolCall::parse(&id, &name, input));
            }
            StreamChunk::Done { usage: u } => {
                if let Some(u) = u {
                    usage = u;
                }
                break;
            }
        }
    }

    if !buffer.is_empty() {
        state
            .sessions
            .send_to(ws_id, ServerEvent::StreamChunk { content: buffer })
            .await;
    }

    Ok((text, calls, usage))
}

/// Execute tool calls sequentially in declared order, emitting a
/// `tool_status{running}` event per call. Only cancellation errors
/// out; tool failures are carried inside the results.
async fn execute_tools(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancelToken,
    calls: &[ToolCall],
) -> Result<Vec<ToolResult>, Error> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        state
            .sessions
            .send_to(
                &input.ws_id,
                ServerEvent::ToolStatus {
                    status: "running".into(),
                    tool: Some(call.name.clone()),
                    count: None,
                },
            )
            .await;

        let result = state.invoker.execute(call).await;

        if result.success {
            if let Some(skill_id) = call.plugin.strip_prefix("skill_") {
                if let Err(e) = state.store.increment_skill_usage(skill_id) {
                    tracing::debug!(skill = skill_id, error = %e, "skill usage bump failed");
                }
            }
        }
        results.push(result);
    }
    Ok(results)
}
