//! User tasks — split a request into subtasks via the model and execute
//! them sequentially.
//!
//! Splitting asks the model for strict JSON (`{"subtasks": [...]}`);
//! when that fails, bullet and numbered lines are recovered from the
//! raw reply. Execution runs each pending subtask as a standalone model
//! call capped at 120 seconds, with a short pause between subtasks, and
//! concatenates the results with `---` separators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};
use tether_providers::{ChatRequest, LlmProvider};

/// Hard cap on a single subtask's model call.
const SUBTASK_TIMEOUT: Duration = Duration::from_secs(120);
/// Pause between subtasks.
const INTER_SUBTASK_PAUSE: Duration = Duration::from_millis(500);
const SPLIT_TEMPERATURE: f32 = 0.3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub process_log: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub session_key: String,
    pub instructions: String,
    pub subtasks: Vec<Subtask>,
    pub status: TaskStatus,
    pub completed: usize,
    pub total: usize,
    #[serde(default)]
    pub result: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskManager {
    path: PathBuf,
    tasks: RwLock<HashMap<String, UserTask>>,
    provider: Arc<dyn LlmProvider>,
}

impl TaskManager {
    pub fn new(state_path: &Path, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("tasks.json");
        let tasks = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
            provider,
        })
    }

    /// Split a task description into subtasks via the model.
    pub async fn split(&self, task: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Split the following task into a short ordered list of concrete subtasks.\n\
             Respond with JSON only, in exactly this shape: {{\"subtasks\": [\"...\"]}}.\n\
             No prose, no code fences.\n\nTask: {task}"
        );
        let req = ChatRequest {
            messages: vec![tether_domain::tool::Message::user(prompt)],
            tools: vec![],
            temperature: Some(SPLIT_TEMPERATURE),
            max_tokens: Some(1_024),
            json_mode: true,
            model: None,
        };
        let resp = self.provider.chat(&req).await?;

        let subtasks = parse_subtasks(&resp.content);
        if subtasks.is_empty() {
            return Err(Error::Other(format!(
                "task split produced no subtasks for: {task}"
            )));
        }
        Ok(subtasks)
    }

    /// Create and persist a task from already-split subtasks.
    pub fn create(&self, session_key: &str, instructions: &str, subtasks: Vec<String>) -> UserTask {
        let task = UserTask {
            id: format!("task-{}", Utc::now().timestamp_millis()),
            session_key: session_key.to_owned(),
            instructions: instructions.to_owned(),
            total: subtasks.len(),
            subtasks: subtasks
                .into_iter()
                .map(|description| Subtask {
                    description,
                    status: SubtaskStatus::Pending,
                    result: None,
                    process_log: Vec::new(),
                })
                .collect(),
            status: TaskStatus::Pending,
            completed: 0,
            result: String::new(),
            created_at: Utc::now(),
        };
        self.tasks.write().insert(task.id.clone(), task.clone());
        self.persist();
        task
    }

    /// Execute every pending subtask in order. Returns the concatenated
    /// result.
    pub async fn execute(&self, task_id: &str) -> Result<String> {
        let subtask_count = {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::Other(format!("unknown task '{task_id}'")))?;
            task.status = TaskStatus::Running;
            task.subtasks.len()
        };
        self.persist();

        let mut pieces: Vec<String> = Vec::new();

        for idx in 0..subtask_count {
            let description = {
                let mut tasks = self.tasks.write();
                let task = tasks.get_mut(task_id).expect("task vanished mid-execute");
                let sub = &mut task.subtasks[idx];
                if sub.status != SubtaskStatus::Pending {
                    pieces.extend(sub.result.clone());
                    continue;
                }
                sub.status = SubtaskStatus::Running;
                sub.process_log.push(format!("started at {}", Utc::now().to_rfc3339()));
                sub.description.clone()
            };
            self.persist();

            let (status, result) = self.run_subtask(&description).await;

            {
                let mut tasks = self.tasks.write();
                let task = tasks.get_mut(task_id).expect("task vanished mid-execute");
                let sub = &mut task.subtasks[idx];
                sub.status = status;
                sub.result = Some(result.clone());
                sub.process_log
                    .push(format!("finished at {} ({:?})", Utc::now().to_rfc3339(), status));
                if status == SubtaskStatus::Completed {
                    task.completed += 1;
                }
            }
            self.persist();
            pieces.push(result);

            if idx + 1 < subtask_count {
                tokio::time::sleep(INTER_SUBTASK_PAUSE).await;
            }
        }

        let combined = pieces.join("\n---\n");
        {
            let mut tasks = self.tasks.write();
            let task = tasks.get_mut(task_id).expect("task vanished mid-execute");
            task.result = combined.clone();
            task.status = if task.completed == 0 && task.total > 0 {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
        }
        self.persist();
        Ok(combined)
    }

    async fn run_subtask(&self, description: &str) -> (SubtaskStatus, String) {
        let req = ChatRequest {
            messages: vec![tether_domain::tool::Message::user(description)],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model: None,
        };
        match tokio::time::timeout(SUBTASK_TIMEOUT, self.provider.chat(&req)).await {
            Ok(Ok(resp)) => (SubtaskStatus::Completed, resp.content),
            Ok(Err(e)) => (SubtaskStatus::Failed, format!("Execution failed: {e}")),
            Err(_) => (SubtaskStatus::Failed, "Execution timeout".to_string()),
        }
    }

    pub fn get(&self, task_id: &str) -> Option<UserTask> {
        self.tasks.read().get(task_id).cloned()
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<UserTask> {
        let mut all: Vec<UserTask> = self.tasks.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Human-readable block for a `[task_done:…]` reference.
    pub fn summary_block(&self, task_id: &str) -> String {
        match self.get(task_id) {
            Some(task) => {
                let mut out = format!(
                    "Task {} — {:?} ({}/{} subtasks)\n",
                    task.id, task.status, task.completed, task.total
                );
                for (i, sub) in task.subtasks.iter().enumerate() {
                    out.push_str(&format!("  {}. [{:?}] {}\n", i + 1, sub.status, sub.description));
                }
                if !task.result.is_empty() {
                    out.push_str(&task.result);
                    out.push('\n');
                }
                out
            }
            None => format!("Task {task_id}: not found\n"),
        }
    }

    fn persist(&self) {
        let snapshot = self.tasks.read().clone();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "failed to persist tasks");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize tasks"),
        }
    }
}

/// Parse the model's split reply: strict JSON first, then bullet or
/// numbered lines of at least six characters.
fn parse_subtasks(reply: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct SplitReply {
        subtasks: Vec<String>,
    }

    let trimmed = reply.trim();
    if let Ok(parsed) = serde_json::from_str::<SplitReply>(trimmed) {
        return parsed
            .subtasks
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // Recovery: harvest list-looking lines.
    trimmed
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let body = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| strip_numbered_prefix(line))?;
            let body = body.trim();
            (body.len() >= 6).then(|| body.to_string())
        })
        .collect()
}

fn strip_numbered_prefix(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::stream::{BoxStream, StreamEvent};
    use tether_providers::ChatResponse;

    struct ScriptedProvider {
        reply: String,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(ChatResponse {
                content: self.reply.clone(),
                tool_calls: vec![],
                usage: None,
                model: "mock".into(),
                finish_reason: Some("stop".into()),
            })
        }
        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            Err(Error::Other("not streamed in tests".into()))
        }
        async fn context_window(&self) -> usize {
            8_192
        }
        fn provider_id(&self) -> &str {
            "mock"
        }
    }

    fn manager(reply: &str) -> (tempfile::TempDir, TaskManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TaskManager::new(
            dir.path(),
            Arc::new(ScriptedProvider {
                reply: reply.into(),
                delay: Duration::ZERO,
            }),
        )
        .unwrap();
        (dir, mgr)
    }

    #[test]
    fn parse_strict_json() {
        let subtasks = parse_subtasks(r#"{"subtasks": ["write the parser", "add tests"]}"#);
        assert_eq!(subtasks, vec!["write the parser", "add tests"]);
    }

    #[test]
    fn parse_recovers_bullets_and_numbers() {
        let reply = "Here is the plan:\n- write the parser\n* add the tests\n1. ship the release\n2) no\nshort";
        let subtasks = parse_subtasks(reply);
        assert_eq!(
            subtasks,
            vec!["write the parser", "add the tests", "ship the release"]
        );
    }

    #[test]
    fn parse_empty_reply_is_empty() {
        assert!(parse_subtasks("I cannot split this.").is_empty());
    }

    #[tokio::test]
    async fn split_error_on_empty() {
        let (_d, mgr) = manager("no list here");
        assert!(mgr.split("do the thing").await.is_err());
    }

    #[tokio::test]
    async fn split_parses_model_json() {
        let (_d, mgr) = manager(r#"{"subtasks": ["a first step", "a second step"]}"#);
        let subtasks = mgr.split("do the thing").await.unwrap();
        assert_eq!(subtasks.len(), 2);
    }

    #[tokio::test]
    async fn execute_runs_all_subtasks_in_order() {
        let (_d, mgr) = manager("done");
        let task = mgr.create(
            "s1",
            "big job",
            vec!["first step".into(), "second step".into()],
        );
        let combined = mgr.execute(&task.id).await.unwrap();
        assert_eq!(combined, "done\n---\ndone");

        let task = mgr.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed, 2);
        assert!(task
            .subtasks
            .iter()
            .all(|s| s.status == SubtaskStatus::Completed));
        assert!(task.subtasks[0].process_log.len() >= 2);
    }

    #[tokio::test]
    async fn task_id_shape_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mgr = TaskManager::new(
                dir.path(),
                Arc::new(ScriptedProvider {
                    reply: "x".into(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();
            let task = mgr.create("s1", "job", vec!["one step".into()]);
            assert!(task.id.starts_with("task-"));
            task.id
        };
        let mgr = TaskManager::new(
            dir.path(),
            Arc::new(ScriptedProvider {
                reply: "x".into(),
                delay: Duration::ZERO,
            }),
        )
        .unwrap();
        assert!(mgr.get(&id).is_some());
    }

    #[tokio::test]
    async fn summary_block_mentions_status() {
        let (_d, mgr) = manager("done");
        let task = mgr.create("s1", "job", vec!["only step".into()]);
        mgr.execute(&task.id).await.unwrap();
        let block = mgr.summary_block(&task.id);
        assert!(block.contains(&task.id));
        assert!(block.contains("1/1"));
        assert!(block.contains("only step"));
    }

    #[tokio::test]
    async fn unknown_task_summary() {
        let (_d, mgr) = manager("x");
        assert!(mgr.summary_block("task-404").contains("not found"));
    }
}
