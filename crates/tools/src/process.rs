//! Process tool — manage background process sessions.
//!
//! Actions: start, log, list, kill, remove. Each started command runs
//! under `sh -c` with its combined output captured into a bounded
//! in-memory buffer that callers poll via `log`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use tether_domain::tool::ToolOutcome;

use crate::registry::Tool;

const MAX_OUTPUT_CHARS: usize = 200_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Finished,
    Killed,
    Failed,
}

pub struct OutputBuffer {
    combined: String,
    max_chars: usize,
}

impl OutputBuffer {
    fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
        }
    }

    fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let drain_count = self.combined.len() - keep;
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.combined.lines().collect();
        if all.len() <= lines {
            self.combined.clone()
        } else {
            all[all.len() - lines..].join("\n")
        }
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }
}

pub struct ProcessSession {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub output: OutputBuffer,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProcessManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory registry of active and recently-finished processes.
#[derive(Default)]
pub struct ProcessManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<ProcessSession>>>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `sh -c <command>` in the background, returning the session id.
    pub fn start(&self, command: &str) -> Result<String, String> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;

        let session = Arc::new(RwLock::new(ProcessSession {
            id: session_id.clone(),
            command: command.to_string(),
            started_at: Utc::now(),
            status: ProcessStatus::Running,
            exit_code: None,
            output: OutputBuffer::new(MAX_OUTPUT_CHARS),
        }));
        self.sessions
            .write()
            .insert(session_id.clone(), session.clone());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Reader tasks feed the shared buffer; the waiter records exit.
        if let Some(out) = stdout {
            let session = session.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut s = session.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            });
        }
        if let Some(err) = stderr {
            let session = session.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut s = session.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            });
        }

        {
            let session = session.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => {
                        let mut s = session.write();
                        if s.status == ProcessStatus::Running {
                            s.status = ProcessStatus::Finished;
                        }
                        s.exit_code = status.code();
                    }
                    Err(e) => {
                        let mut s = session.write();
                        s.status = ProcessStatus::Failed;
                        s.output.push(&format!("wait failed: {e}\n"));
                    }
                }
            });
        }

        Ok(session_id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<RwLock<ProcessSession>>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<serde_json::Value> {
        self.sessions
            .read()
            .values()
            .map(|s| {
                let s = s.read();
                serde_json::json!({
                    "session_id": s.id,
                    "command": s.command,
                    "status": s.status,
                    "started_at": s.started_at.to_rfc3339(),
                    "exit_code": s.exit_code,
                })
            })
            .collect()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Mark a session killed. The `kill_on_drop` child dies with its
    /// waiter task; this just records intent for pollers.
    pub fn kill(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.write().status = ProcessStatus::Killed;
                true
            }
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessTool {
    manager: Arc<ProcessManager>,
}

impl ProcessTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage background processes: start, log, list, kill, remove."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "log", "list", "kill", "remove"],
                    "description": "Action to perform"
                },
                "command": { "type": "string", "description": "Command (for start)" },
                "session_id": { "type": "string", "description": "Process session ID" },
                "tail_lines": { "type": "integer", "description": "Tail lines for log (default 200)" }
            },
            "required": ["action"]
        })
    }

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "start" => {
                let command = match args.get("command").and_then(|v| v.as_str()) {
                    Some(c) if !c.trim().is_empty() => c,
                    _ => return ToolOutcome::err("process", "start requires 'command'"),
                };
                match self.manager.start(command) {
                    Ok(id) => ToolOutcome::ok(serde_json::json!({
                        "session_id": id,
                        "status": "running",
                    })),
                    Err(e) => ToolOutcome::err("process", e),
                }
            }
            "log" => {
                let id = match args.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => id,
                    None => return ToolOutcome::err("process", "log requires 'session_id'"),
                };
                let tail = args
                    .get("tail_lines")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(200) as usize;
                match self.manager.get(id) {
                    Some(session) => {
                        let s = session.read();
                        ToolOutcome::ok(serde_json::json!({
                            "session_id": s.id,
                            "status": s.status,
                            "exit_code": s.exit_code,
                            "content": s.output.tail(tail),
                        }))
                    }
                    None => ToolOutcome::err("process", format!("unknown session '{id}'")),
                }
            }
            "list" => ToolOutcome::ok(serde_json::json!({"sessions": self.manager.list()})),
            "kill" => {
                let id = args.get("session_id").and_then(|v| v.as_str()).unwrap_or("");
                if self.manager.kill(id) {
                    ToolOutcome::ok(serde_json::json!({"killed": id}))
                } else {
                    ToolOutcome::err("process", format!("unknown session '{id}'"))
                }
            }
            "remove" => {
                let id = args.get("session_id").and_then(|v| v.as_str()).unwrap_or("");
                if self.manager.remove(id) {
                    ToolOutcome::ok(serde_json::json!({"removed": id}))
                } else {
                    ToolOutcome::err("process", format!("unknown session '{id}'"))
                }
            }
            other => ToolOutcome::err("process", format!("unknown action '{other}'")),
        }
    }
}
