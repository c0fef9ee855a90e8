//! Command interpreter — recognizes slash commands and intent patterns
//! on the trailing user message before it reaches the model.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use tether_domain::error::Result;
use tether_tools::process::ProcessStatus;

use crate::state::AgentCore;

/// Substrings that make a shell command unconditionally refused.
const BLOCKED_COMMAND_PARTS: [&str; 9] = [
    "rm ", "rm -", "shutdown", "reboot", "mkfs", "dd ", "sudo ", "kill ", ":(){",
];

/// Manual `/compact` waits this long before letting the pass continue in
/// the background.
const COMPACT_WAIT: Duration = Duration::from_secs(30);

/// Log-poll backoff for foreground `run`/`exec` commands.
const POLL_INITIAL: Duration = Duration::from_millis(100);
const POLL_MAX: Duration = Duration::from_millis(500);
const POLL_FACTOR: f64 = 1.5;
const POLL_DEADLINE: Duration = Duration::from_secs(5);

/// Try to interpret the message as a command. `Ok(None)` means "not a
/// command — continue to the model".
pub async fn try_handle(
    core: &AgentCore,
    session_key: &str,
    message: &str,
) -> Result<Option<String>> {
    let trimmed = message.trim();

    if let Some(rest) = strip_command(trimmed, "/compact") {
        return Ok(Some(handle_compact(core, session_key, rest).await));
    }
    if trimmed == "/new" {
        return Ok(Some(handle_new()));
    }
    if trimmed == "/reset" {
        return Ok(Some(handle_reset(core, session_key)));
    }
    if let Some(rest) = strip_command(trimmed, "/split") {
        return Ok(Some(handle_split(core, session_key, rest).await?));
    }
    if trimmed.contains("[task_done:") {
        return Ok(Some(handle_task_done(core, trimmed)));
    }
    if let Some(rest) = strip_command(trimmed, "/debug") {
        return Ok(Some(handle_debug(core, session_key, rest)));
    }
    if let Some(rest) = strip_command(trimmed, "/task") {
        return Ok(Some(handle_task(core, rest)));
    }

    if let Some(captures) = edit_intent_regex().captures(trimmed) {
        let path = captures[1].to_string();
        let find = captures[2].trim().to_string();
        let replace = captures[3].trim().to_string();
        return Ok(Some(handle_edit(core, &path, &find, &replace).await));
    }

    if let Some(command) = extract_shell_command(trimmed) {
        return Ok(Some(handle_shell(core, &command).await));
    }

    Ok(None)
}

/// Whether the message should trigger memory recall injection.
pub fn is_recall_trigger(message: &str) -> bool {
    let lower = message.trim_start().to_lowercase();
    lower.starts_with("/recall") || lower.starts_with("recall") || lower.starts_with("remember")
}

fn strip_command<'a>(message: &'a str, command: &str) -> Option<&'a str> {
    let rest = message.strip_prefix(command)?;
    if rest.is_empty() {
        Some("")
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_compact(core: &AgentCore, session_key: &str, instructions: &str) -> String {
    let instructions = (!instructions.is_empty()).then(|| instructions.to_string());
    let rx = core
        .compactor
        .spawn(session_key, core.estimator.clone(), instructions);

    match tokio::time::timeout(COMPACT_WAIT, rx).await {
        Ok(Ok(true)) => {
            let meta = core.sessions.get(session_key);
            format!(
                "Compaction complete (pass #{}).",
                meta.map(|m| m.compaction_count).unwrap_or(0)
            )
        }
        Ok(Ok(false)) => "Nothing to compact.".to_string(),
        Ok(Err(_)) => "Compaction failed; see logs.".to_string(),
        Err(_) => "Compaction is taking a while; it will finish in the background.".to_string(),
    }
}

fn handle_new() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    format!("Started a fresh session: session-{nanos}")
}

fn handle_reset(core: &AgentCore, session_key: &str) -> String {
    let archived = match core.log.archive_all(session_key) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(session_key, error = %e, "reset archive failed");
            0
        }
    };
    if let Err(e) = core.log.append(
        session_key,
        "system",
        "[session reset]",
        Some(serde_json::json!({"reset": true})),
    ) {
        tracing::warn!(session_key, error = %e, "reset marker failed");
    }
    core.sessions.update(session_key, |m| {
        m.token_estimate = 0;
        m.last_compacted_id = 0;
    });
    core.loop_guard.reset();
    format!("Session reset. {archived} messages archived; the key is unchanged.")
}

async fn handle_split(core: &AgentCore, session_key: &str, task: &str) -> Result<String> {
    if task.is_empty() {
        return Ok("Usage: /split <task>".to_string());
    }
    let subtasks = core.tasks.split(task).await?;
    let created = core.tasks.create(session_key, task, subtasks);
    core.tasks.execute(&created.id).await?;
    Ok(core.tasks.summary_block(&created.id))
}

fn handle_task_done(core: &AgentCore, message: &str) -> String {
    let mut out = String::new();
    for id in task_done_regex()
        .captures_iter(message)
        .map(|c| c[1].to_string())
    {
        out.push_str(&core.tasks.summary_block(&id));
        out.push('\n');
    }
    if out.is_empty() {
        out.push_str("No task references found.");
    }
    out
}

fn handle_debug(core: &AgentCore, session_key: &str, rest: &str) -> String {
    let mut parts = rest.split_whitespace();
    let topic = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or(session_key);
    match topic {
        "archive" => {
            let stats = core.log.archive_stats(target);
            format!(
                "archive '{}': {} messages, {} bytes",
                target, stats.archived_messages, stats.archive_bytes
            )
        }
        "live" => core.realtime.debug_info(target),
        _ => "Usage: /debug archive|live [session]".to_string(),
    }
}

fn handle_task(core: &AgentCore, rest: &str) -> String {
    let mut parts = rest.split_whitespace();
    match parts.next().unwrap_or("list") {
        "list" => {
            let tasks = core.tasks.list();
            if tasks.is_empty() {
                return "No tasks.".to_string();
            }
            tasks
                .iter()
                .map(|t| {
                    format!(
                        "{} [{:?}] {}/{} — {}",
                        t.id,
                        t.status,
                        t.completed,
                        t.total,
                        truncate(&t.instructions, 60)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        "detail" => match parts.next() {
            Some(id) => core.tasks.summary_block(id),
            None => "Usage: /task detail <task-id>".to_string(),
        },
        "summary" => {
            let tasks = core.tasks.list();
            let done = tasks
                .iter()
                .filter(|t| t.status == crate::tasks::TaskStatus::Completed)
                .count();
            format!("{} tasks, {} completed", tasks.len(), done)
        }
        other => format!("Unknown /task subcommand '{other}'"),
    }
}

async fn handle_edit(core: &AgentCore, path: &str, find: &str, replace: &str) -> String {
    let outcome = core
        .tools
        .call_tool(
            "edit",
            &serde_json::json!({"path": path, "find": find, "replace": replace}),
        )
        .await;
    match outcome {
        tether_domain::tool::ToolOutcome::Ok(v) => {
            format!(
                "Edited {path}: {} replacement(s).",
                v.get("replacements").and_then(|r| r.as_u64()).unwrap_or(0)
            )
        }
        tether_domain::tool::ToolOutcome::Err { message, .. } => {
            format!("Edit failed: {message}")
        }
    }
}

/// Recognize bare `run <cmd>` / `exec <cmd>` messages (plus the literal
/// `uname -r` shorthand).
fn extract_shell_command(message: &str) -> Option<String> {
    if message == "uname -r" {
        return Some(message.to_string());
    }
    let captures = shell_intent_regex().captures(message)?;
    Some(captures[1].trim().to_string())
}

async fn handle_shell(core: &AgentCore, command: &str) -> String {
    if let Some(blocked) = blocked_part(command) {
        return format!("Command refused: contains blocked pattern '{blocked}'.");
    }

    let outcome = core
        .tools
        .call_tool(
            "process",
            &serde_json::json!({"action": "start", "command": command}),
        )
        .await;
    let session_id = match outcome {
        tether_domain::tool::ToolOutcome::Ok(v) => {
            match v.get("session_id").and_then(|s| s.as_str()) {
                Some(id) => id.to_string(),
                None => return "Process start returned no session id.".to_string(),
            }
        }
        tether_domain::tool::ToolOutcome::Err { message, .. } => {
            return format!("Failed to start: {message}");
        }
    };

    // Poll the process log with backoff until the command settles.
    let deadline = Instant::now() + POLL_DEADLINE;
    let mut delay = POLL_INITIAL;
    loop {
        tokio::time::sleep(delay).await;
        delay = Duration::from_millis(
            ((delay.as_millis() as f64 * POLL_FACTOR) as u64).min(POLL_MAX.as_millis() as u64),
        );

        let finished = core
            .processes
            .get(&session_id)
            .map(|s| s.read().status != ProcessStatus::Running)
            .unwrap_or(true);
        if finished || Instant::now() >= deadline {
            break;
        }
    }

    match core.processes.get(&session_id) {
        Some(session) => {
            let s = session.read();
            let log = s.output.tail(200);
            if s.status == ProcessStatus::Running {
                format!("Still running (session {session_id}). Output so far:\n{log}")
            } else if log.is_empty() {
                format!("Command finished with no output (exit code {:?}).", s.exit_code)
            } else {
                log
            }
        }
        None => "Process session disappeared.".to_string(),
    }
}

fn blocked_part(command: &str) -> Option<&'static str> {
    BLOCKED_COMMAND_PARTS
        .iter()
        .find(|needle| command.contains(*needle))
        .copied()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ── Compiled patterns ───────────────────────────────────────────────

fn edit_intent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^edit\s+(\S+)\s*:\s*replace\s+(.+?)\s+with\s+(.+)$")
            .expect("edit intent regex is valid")
    })
}

fn shell_intent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:run|exec)\s+(.+)$").expect("shell intent regex is valid")
    })
}

fn task_done_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[task_done:(task-[0-9]+)\]").expect("task_done regex is valid")
    })
}
