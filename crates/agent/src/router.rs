//! Session router — the front door for every inbound message.
//!
//! Routes the message through the command interpreter, picks HTTP vs
//! live mode, injects memory recall, replays stored history, applies
//! context-window management, dispatches to the orchestrator, and
//! persists both sides of the turn. Storage writes are best-effort: a
//! failed write is logged, never surfaced.

use chrono::Utc;

use tether_domain::error::Result;
use tether_domain::tool::Message;
use tether_sessions::{ProviderType, StoredMessage};

use crate::commands;
use crate::realtime::{self, Route};
use crate::state::AgentCore;
use crate::turn::{run_model_turn, ChunkCallback};

/// Session key used when the caller supplies none.
pub const DEFAULT_SESSION_KEY: &str = "default";
/// How much stored history is replayed into the prompt.
const HISTORY_LIMIT: usize = 100;
/// Prefix applied when a live turn falls back to HTTP.
const REALTIME_FALLBACK_PREFIX: &str = "[realtime-fallback] ";

pub struct TurnRequest {
    pub session_key: String,
    pub message: String,
    pub on_chunk: Option<ChunkCallback>,
}

/// Handle one inbound message and return the reply text.
pub async fn handle_message(core: &AgentCore, req: TurnRequest) -> Result<String> {
    // The realtime short-circuit sees the key as supplied — an empty key
    // routes to HTTP before the default key is substituted.
    let supplied_key = req.session_key.clone();
    let session_key = if supplied_key.is_empty() {
        DEFAULT_SESSION_KEY.to_string()
    } else {
        supplied_key.clone()
    };

    // Slash commands and intent patterns bypass the model.
    if let Some(reply) = commands::try_handle(core, &session_key, &req.message).await? {
        return Ok(reply);
    }

    let persisted = core.sessions.get(&session_key).map(|m| m.provider_type);
    if realtime::choose_route(&supplied_key, &req.message, persisted) == Route::Live {
        return live_turn(core, &session_key, &req).await;
    }

    // Explicit HTTP directives are routing instructions, not content.
    let message = strip_http_directive(&req.message);
    http_turn(core, &session_key, message, req.on_chunk).await
}

fn strip_http_directive(message: &str) -> &str {
    let trimmed = message.trim_start();
    for directive in ["/text", "/http"] {
        if let Some(rest) = trimmed.strip_prefix(directive) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    message
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Live path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn live_turn(core: &AgentCore, session_key: &str, req: &TurnRequest) -> Result<String> {
    core.sessions.update(session_key, |m| {
        m.provider_type = ProviderType::Live;
        m.last_realtime_activity = Some(Utc::now());
    });

    let payload = realtime::parse_payload(&req.message);
    match core.realtime.turn(session_key, &payload).await {
        Ok(reply) => {
            let user_text = payload.text.as_deref().unwrap_or(&req.message);
            persist_turn(core, session_key, user_text, &reply);
            core.sessions.update(session_key, |m| {
                m.last_realtime_activity = Some(Utc::now());
            });
            Ok(reply)
        }
        Err(e) => {
            tracing::warn!(session_key, error = %e, "live turn failed, falling back to HTTP");
            let original = payload.text.as_deref().unwrap_or(req.message.as_str());
            let fallback = format!("{REALTIME_FALLBACK_PREFIX}{original}");
            // The session keeps its live provider type; only this turn
            // degrades to HTTP.
            http_turn(core, session_key, &fallback, req.on_chunk.clone()).await
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn http_turn(
    core: &AgentCore,
    session_key: &str,
    user_message: &str,
    on_chunk: Option<ChunkCallback>,
) -> Result<String> {
    let (_meta, is_new) = core.sessions.resolve_or_create(session_key);

    let mut prefix: Vec<Message> = Vec::new();

    // New sessions get the boot-time system prompt when one is cached.
    if is_new {
        if let Some(prompt) = load_bootstrap_prompt(core) {
            prefix.push(Message::system(prompt));
        }
    }

    // Memory recall: explicit triggers, or every turn when auto_recall
    // is on.
    if commands::is_recall_trigger(user_message) || core.config.recall.auto_recall {
        let block = core.recaller.recall(user_message).await;
        if !block.is_empty() {
            prefix.push(Message::system(block));
        }
    }

    let history = load_history(core, session_key);
    let tail = vec![Message::user(user_message)];

    let messages =
        crate::context::handle_overflow(core, session_key, prefix, history, tail).await;

    let outcome = run_model_turn(core, messages, on_chunk).await?;
    if outcome.is_error() {
        tracing::warn!(session_key, "turn ended on a sentinel outcome");
    }
    let reply = outcome.render();

    persist_turn(core, session_key, user_message, &reply);

    // Auto-capture is fire-and-forget; the flush trigger only logs.
    {
        let recaller = core.recaller.clone();
        let message = user_message.to_string();
        tokio::spawn(async move {
            recaller.observe(&message).await;
        });
    }
    if core.recaller.should_flush() {
        tracing::info!(session_key, "memory soft flush triggered");
    }

    Ok(reply)
}

fn load_bootstrap_prompt(core: &AgentCore) -> Option<String> {
    let path = core.config.storage.bootstrap_prompt_path.as_ref()?;
    match std::fs::read_to_string(path) {
        Ok(prompt) if !prompt.trim().is_empty() => Some(prompt),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "bootstrap prompt unavailable");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History replay and persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load the last stored messages for a session as model messages.
pub fn load_history(core: &AgentCore, session_key: &str) -> Vec<Message> {
    let lines = match core.log.last_n(session_key, HISTORY_LIMIT) {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(session_key, error = %e, "history load failed, starting empty");
            Vec::new()
        }
    };
    stored_to_messages(&lines)
}

/// Convert stored log lines into model messages. Tool lines need a
/// `call_id` in their metadata; assistant lines that recorded tool calls
/// replay them as tool-use parts so result ids stay paired.
pub fn stored_to_messages(lines: &[StoredMessage]) -> Vec<Message> {
    let mut messages = Vec::new();

    for line in lines {
        match line.role.as_str() {
            "user" => messages.push(Message::user(&line.content)),
            "system" => messages.push(Message::system(&line.content)),
            "assistant" => {
                let calls = line
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("tool_calls"))
                    .and_then(|v| {
                        serde_json::from_value::<Vec<tether_domain::tool::ToolCall>>(v.clone())
                            .ok()
                    })
                    .unwrap_or_default();
                if calls.is_empty() {
                    messages.push(Message::assistant(&line.content));
                } else {
                    messages.push(Message::assistant_with_calls(&line.content, &calls));
                }
            }
            "tool" => {
                let call_id = line
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("call_id"))
                    .and_then(|v| v.as_str());
                match call_id {
                    Some(id) => messages.push(Message::tool_result(id, &line.content)),
                    // Orphan tool output can't be paired — skip it.
                    None => continue,
                }
            }
            _ => continue,
        }
    }

    messages
}

/// Persist both sides of a turn and refresh the token estimate.
/// Best-effort: failures log and never fail the turn.
pub fn persist_turn(core: &AgentCore, session_key: &str, user_message: &str, reply: &str) {
    if !user_message.is_empty() {
        if let Err(e) = core.log.append(session_key, "user", user_message, None) {
            tracing::warn!(session_key, error = %e, "failed to persist user message");
        }
    }
    if let Err(e) = core.log.append(session_key, "assistant", reply, None) {
        tracing::warn!(session_key, error = %e, "failed to persist assistant message");
    }

    let added = core.estimator.estimate_text(user_message) + core.estimator.estimate_text(reply);
    core.sessions.update(session_key, |m| {
        m.token_estimate += added as u64 + 8;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: u64, role: &str, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            timestamp: Utc::now().to_rfc3339(),
            role: role.into(),
            content: content.into(),
            metadata: None,
        }
    }

    #[test]
    fn stored_roles_map_to_messages() {
        let lines = vec![
            line(1, "system", "be helpful"),
            line(2, "user", "hi"),
            line(3, "assistant", "hello"),
        ];
        let messages = stored_to_messages(&lines);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, tether_domain::tool::Role::System);
        assert_eq!(messages[2].role, tether_domain::tool::Role::Assistant);
    }

    #[test]
    fn orphan_tool_lines_are_skipped() {
        let lines = vec![line(1, "tool", "output with no call id")];
        assert!(stored_to_messages(&lines).is_empty());
    }

    #[test]
    fn tool_lines_with_call_id_pair_up() {
        let mut tool_line = line(2, "tool", "result data");
        tool_line.metadata = Some(serde_json::json!({"call_id": "tc_9"}));
        let messages = stored_to_messages(&[tool_line]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, tether_domain::tool::Role::Tool);
    }

    #[test]
    fn assistant_tool_calls_replay() {
        let mut a = line(1, "assistant", "checking");
        a.metadata = Some(serde_json::json!({
            "tool_calls": [
                {"call_id": "tc_1", "tool_name": "read", "arguments": {"path": "x"}}
            ]
        }));
        let messages = stored_to_messages(&[a]);
        let calls = messages[0].tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read");
    }

    #[test]
    fn unknown_roles_are_dropped() {
        let lines = vec![line(1, "narrator", "meanwhile")];
        assert!(stored_to_messages(&lines).is_empty());
    }

    #[test]
    fn http_directives_are_stripped() {
        assert_eq!(strip_http_directive("/text hello there"), "hello there");
        assert_eq!(strip_http_directive("/http ping"), "ping");
        assert_eq!(strip_http_directive("/texting habits"), "/texting habits");
        assert_eq!(strip_http_directive("plain message"), "plain message");
    }
}
