//! Exec tool — run a command to completion and return its output.
//!
//! One-shot only: long-running work belongs to the `process` tool.

use serde::Deserialize;
use tokio::process::Command;

use tether_domain::tool::ToolOutcome;

use crate::registry::Tool;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub workdir: Option<String>,
    /// Hard timeout in seconds.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

#[derive(Default)]
pub struct ExecTool;

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command to completion and return stdout, stderr, and the exit code."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "workdir": { "type": "string", "description": "Working directory" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        })
    }

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        let req: ExecRequest = match serde_json::from_value(args.clone()) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::err("exec", format!("bad arguments: {e}")),
        };
        if req.command.trim().is_empty() {
            return ToolOutcome::err("exec", "empty command");
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&req.command);
        if let Some(ref wd) = req.workdir {
            cmd.current_dir(wd);
        }
        cmd.kill_on_drop(true);

        let timeout =
            std::time::Duration::from_secs(req.timeout_sec.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolOutcome::err("exec", format!("failed to spawn: {e}")),
            Err(_) => {
                return ToolOutcome::err(
                    "exec",
                    format!("command timed out after {}s", timeout.as_secs()),
                )
            }
        };

        ToolOutcome::ok(serde_json::json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": output.status.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let tool = ExecTool;
        let out = tool
            .call(&serde_json::json!({"command": "echo out; echo err 1>&2"}))
            .await;
        match out {
            ToolOutcome::Ok(v) => {
                assert!(v["stdout"].as_str().unwrap().contains("out"));
                assert!(v["stderr"].as_str().unwrap().contains("err"));
                assert_eq!(v["exit_code"], 0);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_ok_outcome() {
        let tool = ExecTool;
        let out = tool.call(&serde_json::json!({"command": "exit 3"})).await;
        match out {
            ToolOutcome::Ok(v) => assert_eq!(v["exit_code"], 3),
            other => panic!("expected Ok outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let tool = ExecTool;
        let out = tool
            .call(&serde_json::json!({"command": "sleep 5", "timeout_sec": 1}))
            .await;
        assert!(!out.is_ok());
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let tool = ExecTool;
        let out = tool.call(&serde_json::json!({"command": "  "})).await;
        assert!(!out.is_ok());
    }
}
