//! The tool orchestrator: drives the model → tool → model loop for one
//! turn.
//!
//! Each round sends the accumulated messages to the dispatcher, decodes
//! tool calls (native array first, vendor text formats as fallback),
//! consults the loop detector, executes through the registry, and
//! threads the results back. Follow-up rounds carry a depth counter so
//! the dispatcher can tighten timeouts; at depth ≥ 2 the tool results
//! are returned verbatim instead of looping back into the model.
//!
//! When a chunk callback is supplied, content streams through it and
//! tool lifecycle events are emitted as opaque `[TOOL_EVENT]`-prefixed
//! strings for the transport layer to re-frame. They are never part of
//! the persisted reply.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use tether_domain::config::ThinkingMode;
use tether_domain::error::Result;
use tether_domain::stream::StreamEvent;
use tether_domain::tool::{Message, ToolCall, ToolOutcome};
use tether_providers::parse::parse_vendor_tool_calls;
use tether_providers::{ChatRequest, LlmProvider};
use tether_tools::truncate_value;

use crate::state::AgentCore;

/// Framing prefix for tool lifecycle events on the content channel.
pub const TOOL_EVENT_PREFIX: &str = "[TOOL_EVENT]";

/// Rounds after which tool results go back verbatim.
const MAX_DEPTH: u32 = 2;

pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of one orchestrated turn. Sentinel conditions are variants,
/// not strings: only the outer layer renders them into reply text.
#[derive(Debug, Clone)]
pub enum TurnReply {
    /// A normal assistant reply.
    Text(String),
    /// The tool batch was aborted by the loop detector.
    LoopAborted { message: String },
    /// Depth exhausted: the raw tool results of the final round.
    RawToolResults(Value),
}

impl TurnReply {
    /// Render the user-visible reply text.
    pub fn render(&self) -> String {
        match self {
            TurnReply::Text(text) => text.clone(),
            TurnReply::LoopAborted { message } => message.clone(),
            TurnReply::RawToolResults(value) => {
                serde_json::to_string_pretty(value).unwrap_or_default()
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TurnReply::LoopAborted { .. })
    }
}

/// Run the model over `messages` until it stops asking for tools (or
/// the depth bound trips).
pub async fn run_model_turn(
    core: &AgentCore,
    messages: Vec<Message>,
    on_chunk: Option<ChunkCallback>,
) -> Result<TurnReply> {
    let tool_defs = core.tools.specs();
    let mut messages = messages;
    let mut depth: u32 = 0;

    loop {
        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(core.config.llm.temperature),
            max_tokens: Some(core.config.llm.max_tokens),
            json_mode: false,
            model: None,
        };

        let (text, native_calls) = match (&on_chunk, depth) {
            (Some(cb), 0) => stream_round(core, &req, cb).await?,
            _ => {
                let resp = core.provider.chat_with_depth(&req, depth).await?;
                (resp.content, resp.tool_calls)
            }
        };

        // Vendor fall-through: some models put their calls in the text.
        let decoded = if native_calls.is_empty() {
            parse_vendor_tool_calls(&text)
        } else {
            native_calls
        };
        let calls: Vec<ToolCall> = decoded.into_iter().map(|c| c.normalized()).collect();

        if calls.is_empty() {
            return Ok(TurnReply::Text(text));
        }

        emit_tool_start(&on_chunk, &calls);

        // Execute the batch. A detected loop aborts the whole batch.
        let mut results: Vec<(ToolCall, Value, bool)> = Vec::with_capacity(calls.len());
        for call in &calls {
            if let Some(issue) = core.loop_guard.check(&call.tool_name, &call.arguments) {
                let message = issue.message();
                tracing::warn!(tool = %call.tool_name, %message, "aborting tool batch");
                emit_tool_result(&on_chunk, &call.call_id, false, &Value::String(message.clone()));
                return Ok(TurnReply::LoopAborted { message });
            }
            core.loop_guard.record(&call.tool_name, &call.arguments);

            let outcome = core.tools.call_tool(&call.tool_name, &call.arguments).await;
            let (envelope, full_envelope, success) = build_envelope(core, call, outcome);
            // `truncate_before` moves the cap in front of the event
            // stream too; otherwise only the model sees the capped form.
            let event_payload = if core.config.truncation.truncate_before {
                &envelope
            } else {
                &full_envelope
            };
            emit_tool_result(&on_chunk, &call.call_id, success, event_payload);
            results.push((call.clone(), envelope, success));
        }

        // Thread the results back: assistant message with the calls,
        // then one tool-role message per result, ids matching.
        messages.push(Message::assistant_with_calls(&text, &calls));
        for (call, envelope, _) in &results {
            messages.push(Message::tool_result(&call.call_id, envelope.to_string()));
        }

        depth += 1;
        if depth >= MAX_DEPTH {
            // Tool-result follow-ups are exhausted: hand the raw results
            // to the caller instead of another model round.
            let raw: Vec<Value> = results
                .iter()
                .map(|(call, envelope, _)| {
                    serde_json::json!({
                        "tool_call_id": call.call_id,
                        "tool": call.tool_name,
                        "result": envelope,
                    })
                })
                .collect();
            return Ok(TurnReply::RawToolResults(Value::Array(raw)));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming round
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive one streaming model round: content chunks go to the callback,
/// tool calls are assembled from start/delta/finished events. If a
/// partially-assembled call carries unparseable argument JSON, the round
/// is retried non-streaming.
async fn stream_round(
    core: &AgentCore,
    req: &ChatRequest,
    on_chunk: &ChunkCallback,
) -> Result<(String, Vec<ToolCall>)> {
    let mut stream = core.provider.chat_stream(req).await?;

    let mut text_buf = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    // call_id -> (name, args buffer) for providers that never send
    // ToolCallFinished.
    let mut partial: std::collections::HashMap<String, (String, String)> =
        std::collections::HashMap::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Thinking { text } => {
                if core.config.llm.thinking_mode == ThinkingMode::Stream {
                    on_chunk(&text);
                }
            }
            StreamEvent::Token { text } => {
                on_chunk(&text);
                text_buf.push_str(&text);
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                partial.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = partial.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                partial.remove(&call_id);
                calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { .. } => {}
            StreamEvent::Error { message } => {
                return Err(tether_domain::Error::Provider {
                    provider: core.provider.provider_id().into(),
                    message,
                });
            }
        }
    }

    // Assemble leftovers. Empty arguments normalize to `{}`; invalid
    // JSON falls back to the non-streaming retry path.
    for (call_id, (tool_name, args_buf)) in partial.drain() {
        let trimmed = args_buf.trim();
        if trimmed.is_empty() {
            calls.push(ToolCall {
                call_id,
                tool_name,
                arguments: Value::Object(Default::default()),
            });
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(arguments) => calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            }),
            Err(e) => {
                tracing::warn!(
                    call_id = %call_id,
                    error = %e,
                    "streamed tool arguments invalid, retrying non-streaming"
                );
                let resp = core.provider.chat(req).await?;
                return Ok((resp.content, resp.tool_calls));
            }
        }
    }

    Ok((text_buf, calls))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the wire envelopes for one tool outcome: exec folding, result
/// truncation, and the `{tool, success, result|error}` shape, augmented
/// with truncation sizes when the result was cut. Returns the truncated
/// envelope (threaded to the model), the full envelope (for the event
/// stream), and the success flag.
fn build_envelope(core: &AgentCore, call: &ToolCall, outcome: ToolOutcome) -> (Value, Value, bool) {
    let outcome = if call.tool_name == "exec" {
        fold_exec_output(outcome)
    } else {
        outcome
    };

    match outcome {
        ToolOutcome::Ok(value) => {
            let full = serde_json::json!({
                "tool": call.tool_name,
                "success": true,
                "result": value,
            });
            let (value, marker) = truncate_value(
                full["result"].clone(),
                &core.config.truncation,
            );
            let mut envelope = serde_json::json!({
                "tool": call.tool_name,
                "success": true,
                "result": value,
            });
            if let Some(m) = marker {
                envelope["truncated"] = Value::Bool(true);
                envelope["original_size"] = Value::from(m.original_size);
                envelope["truncated_size"] = Value::from(m.truncated_size);
            }
            (envelope, full, true)
        }
        err @ ToolOutcome::Err { .. } => {
            let envelope = err.to_envelope(&call.tool_name);
            (envelope.clone(), envelope, false)
        }
    }
}

/// exec returns `{stdout, stderr, exit_code}`; the model sees one folded
/// string.
fn fold_exec_output(outcome: ToolOutcome) -> ToolOutcome {
    let ToolOutcome::Ok(value) = outcome else {
        return outcome;
    };
    let Some(obj) = value.as_object() else {
        return ToolOutcome::Ok(value);
    };

    let stdout = obj.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
    let stderr = obj.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
    let exit_code = obj.get("exit_code").and_then(|v| v.as_i64());

    let mut folded = String::new();
    folded.push_str(stdout);
    if !stderr.is_empty() {
        if !folded.is_empty() && !folded.ends_with('\n') {
            folded.push('\n');
        }
        folded.push_str(stderr);
    }
    if let Some(code) = exit_code {
        if code != 0 {
            if !folded.is_empty() && !folded.ends_with('\n') {
                folded.push('\n');
            }
            folded.push_str(&format!("(exit code {code})"));
        }
    }

    ToolOutcome::Ok(Value::String(folded))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool event emission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn emit_tool_start(on_chunk: &Option<ChunkCallback>, calls: &[ToolCall]) {
    let Some(cb) = on_chunk else { return };
    let tools: Vec<Value> = calls
        .iter()
        .map(|c| serde_json::json!({"name": c.tool_name, "id": c.call_id}))
        .collect();
    let payload = serde_json::json!({"type": "tool_start", "tools": tools});
    cb(&format!("{TOOL_EVENT_PREFIX}{payload}"));
}

fn emit_tool_result(
    on_chunk: &Option<ChunkCallback>,
    call_id: &str,
    success: bool,
    result: &Value,
) {
    let Some(cb) = on_chunk else { return };
    let payload = serde_json::json!({
        "type": "tool_result",
        "tool_id": call_id,
        "success": success,
        "result": result,
    });
    cb(&format!("{TOOL_EVENT_PREFIX}{payload}"));
}
