//! End-to-end scenarios over the agent core with scripted providers:
//! compaction, tool-loop detection, vendor tool-call parsing, realtime
//! fallback, recall injection, and turn idempotence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tether_agent::router::{handle_message, TurnRequest};
use tether_agent::state::AgentCore;
use tether_domain::config::Config;
use tether_domain::error::{Error, Result};
use tether_domain::stream::{BoxStream, StreamEvent};
use tether_domain::tool::{ToolCall, ToolOutcome};
use tether_memory::types::{MemoryCategory, MemoryEntry, SearchHit};
use tether_memory::VectorMemory;
use tether_providers::traits::{
    DisconnectCallback, NoRealtimeTransport, RealtimeFactory, RealtimeProvider, RealtimeSettings,
    TextCallback,
};
use tether_providers::{ChatRequest, ChatResponse, LlmProvider};
use tether_sessions::ProviderType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted model step.
enum Step {
    Reply(&'static str),
    ReplyOwned(String),
    ToolCall { tool: &'static str, args: serde_json::Value },
    Fail,
}

struct MockProvider {
    script: Mutex<VecDeque<Step>>,
    /// Used when the script runs dry.
    default_reply: String,
    /// Reply served to compaction summary requests.
    summary_reply: String,
    requests: Mutex<Vec<ChatRequest>>,
    call_ids: AtomicUsize,
    chat_calls: AtomicUsize,
}

impl MockProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            default_reply: "done".into(),
            summary_reply: "summary of earlier conversation".into(),
            requests: Mutex::new(Vec::new()),
            call_ids: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
        })
    }

    fn last_user_text(&self) -> Option<String> {
        let requests = self.requests.lock();
        let req = requests.last()?;
        req.messages
            .iter()
            .rev()
            .find(|m| m.role == tether_domain::tool::Role::User)
            .map(|m| m.content.extract_all_text())
    }

    fn system_texts(&self) -> Vec<String> {
        let requests = self.requests.lock();
        requests
            .last()
            .map(|req| {
                req.messages
                    .iter()
                    .filter(|m| m.role == tether_domain::tool::Role::System)
                    .map(|m| m.content.extract_all_text())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_summary_request(req: &ChatRequest) -> bool {
        req.messages
            .first()
            .map(|m| m.content.extract_all_text().contains("conversation summarizer"))
            .unwrap_or(false)
    }

    fn reply(content: String, tool_calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content,
            tool_calls,
            usage: None,
            model: "mock".into(),
            finish_reason: Some("stop".into()),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        if Self::is_summary_request(req) {
            return Ok(Self::reply(self.summary_reply.clone(), vec![]));
        }

        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req.clone());

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(Self::reply(text.to_string(), vec![])),
            Some(Step::ReplyOwned(text)) => Ok(Self::reply(text, vec![])),
            Some(Step::ToolCall { tool, args }) => {
                let id = self.call_ids.fetch_add(1, Ordering::SeqCst);
                Ok(Self::reply(
                    String::new(),
                    vec![ToolCall {
                        call_id: format!("tc_{id}"),
                        tool_name: tool.to_string(),
                        arguments: args,
                    }],
                ))
            }
            Some(Step::Fail) => Err(Error::Http("connection reset by peer".into())),
            None => Ok(Self::reply(self.default_reply.clone(), vec![])),
        }
    }

    async fn chat_stream(
        &self,
        _req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Err(Error::Other("streaming not scripted".into()))
    }

    async fn context_window(&self) -> usize {
        8_192
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

struct MockMemory {
    hits: Vec<SearchHit>,
    stored: Mutex<Vec<String>>,
}

impl MockMemory {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            hits: vec![],
            stored: Mutex::new(vec![]),
        })
    }
}

#[async_trait::async_trait]
impl VectorMemory for MockMemory {
    async fn search(&self, _query: &str, limit: usize, min_score: f64) -> Result<Vec<SearchHit>> {
        Ok(self
            .hits
            .iter()
            .filter(|h| h.score >= min_score)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn store_with_source(
        &self,
        content: &str,
        _category: MemoryCategory,
        _importance: f64,
        _source: &str,
    ) -> Result<()> {
        self.stored.lock().push(content.to_string());
        Ok(())
    }
}

/// Realtime double whose sends always fail, driving the HTTP fallback.
struct FailingRealtime {
    connected: AtomicBool,
}

#[async_trait::async_trait]
impl RealtimeProvider for FailingRealtime {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    async fn send_text(&self, _text: &str) -> Result<()> {
        Err(Error::Provider {
            provider: "realtime".into(),
            message: "websocket torn down".into(),
        })
    }
    async fn send_audio(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
    async fn end_audio(&self) -> Result<()> {
        Ok(())
    }
    fn on_text(&self, _cb: TextCallback) {}
    fn on_error(&self, _cb: TextCallback) {}
    fn on_disconnect(&self, _cb: DisconnectCallback) {}
}

struct FailingRealtimeFactory;

impl RealtimeFactory for FailingRealtimeFactory {
    fn open(&self, _settings: RealtimeSettings) -> Result<Arc<dyn RealtimeProvider>> {
        Ok(Arc::new(FailingRealtime {
            connected: AtomicBool::new(false),
        }))
    }
}

/// Counting tool double, registered over a built-in name.
struct CountingTool {
    name: &'static str,
    calls: Arc<Mutex<Vec<serde_json::Value>>>,
    reply: serde_json::Value,
}

#[async_trait::async_trait]
impl tether_tools::Tool for CountingTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "test double"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        self.calls.lock().push(args.clone());
        ToolOutcome::Ok(self.reply.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_core_with(
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn VectorMemory>,
    factory: Arc<dyn RealtimeFactory>,
    tweak: impl FnOnce(&mut Config),
) -> (tempfile::TempDir, AgentCore) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.state_path = dir.path().to_path_buf();
    config.realtime.api_key = Some("test-key".into());
    tweak(&mut config);
    let core = AgentCore::new(Arc::new(config), provider, memory, factory).unwrap();
    (dir, core)
}

fn test_core(
    provider: Arc<dyn LlmProvider>,
    tweak: impl FnOnce(&mut Config),
) -> (tempfile::TempDir, AgentCore) {
    test_core_with(
        provider,
        MockMemory::empty(),
        Arc::new(NoRealtimeTransport),
        tweak,
    )
}

async fn send(core: &AgentCore, session_key: &str, message: &str) -> Result<String> {
    handle_message(
        core,
        TurnRequest {
            session_key: session_key.into(),
            message: message.into(),
            on_chunk: None,
        },
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn compaction_triggers_on_long_session() {
    let provider = MockProvider::new(vec![Step::Reply("the reply")]);
    let (_dir, core) = test_core(provider.clone(), |c| {
        c.context.context_tokens = Some(8_192);
        c.context.reserve_tokens = 1_024;
        c.context.soft_tokens = 800;
        c.compaction.threshold = 0.7;
        c.compaction.keep_messages = 30;
    });

    // Seed 50 stored messages heavy enough to blow the threshold.
    let filler: String = (0..180)
        .map(|i| format!("history item {i} with several distinct words "))
        .collect();
    for i in 0..50 {
        let role = if i % 2 == 0 { "user" } else { "assistant" };
        core.log
            .append("long", role, &format!("{i}: {filler}"), None)
            .unwrap();
    }

    let reply = send(&core, "long", "one more question").await.unwrap();
    assert_eq!(reply, "the reply");

    // Post-compaction shape: one summary + 30 kept + the new pair.
    let lines = core.log.read("long").unwrap();
    assert_eq!(lines.len(), 33);
    assert!(lines[0].is_summary());
    assert!(lines[0].content.starts_with("[summary]\n"));
    assert!(lines[0].content.contains("summary of earlier conversation"));
    assert_eq!(lines[31].role, "user");
    assert_eq!(lines[31].content, "one more question");
    assert_eq!(lines[32].role, "assistant");

    let meta = core.sessions.get("long").unwrap();
    assert_eq!(meta.compaction_count, 1);
    assert!(core.log.archive_stats("long").archived_messages >= 20);
}

#[tokio::test]
async fn tool_loop_detected_after_consecutive_reads() {
    // Every model round asks for the same read(x.txt).
    let steps: Vec<Step> = (0..40)
        .map(|_| Step::ToolCall {
            tool: "read",
            args: serde_json::json!({"path": "x.txt"}),
        })
        .collect();
    let provider = MockProvider::new(steps);
    let (_dir, core) = test_core(provider.clone(), |c| {
        c.tool_loop.same_tool_limit = 10;
        c.tool_loop.max_calls = 100;
    });

    // Count actual tool executions through a registered double.
    let calls = Arc::new(Mutex::new(Vec::new()));
    core.tools.register(Arc::new(CountingTool {
        name: "read",
        calls: calls.clone(),
        reply: serde_json::json!({"content": "file body"}),
    }));

    // Each turn performs two identical calls (depth bound), so the 6th
    // turn crosses the 10-call consecutive limit.
    let mut last = String::new();
    for _ in 0..6 {
        last = send(&core, "loopy", "keep going").await.unwrap();
    }

    assert_eq!(
        last,
        "Tool loop detected: Tool 'read' consecutive calls exceed limit (>= 10)"
    );
    // Exactly ten executions; the eleventh was refused.
    assert_eq!(calls.lock().len(), 10);
}

#[tokio::test]
async fn vendor_xml_tool_call_is_parsed_and_executed() {
    let xml = r#"<minimax:tool_call><invoke name="read_file"><parameter name="path">/tmp/a</parameter></invoke></minimax:tool_call>"#;
    let provider = MockProvider::new(vec![
        Step::ReplyOwned(xml.to_string()),
        Step::Reply("the file holds hello"),
    ]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    let calls = Arc::new(Mutex::new(Vec::new()));
    core.tools.register(Arc::new(CountingTool {
        name: "read",
        calls: calls.clone(),
        reply: serde_json::json!({"content": "hello"}),
    }));

    let reply = send(&core, "vendor", "what does the file say?").await.unwrap();
    assert_eq!(reply, "the file holds hello");

    let recorded = calls.lock();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], serde_json::json!({"path": "/tmp/a"}));
}

#[tokio::test]
async fn depth_bound_returns_tool_results_verbatim() {
    // The model never stops asking for tools; after two rounds the raw
    // results come back instead of a third model call.
    let steps: Vec<Step> = (0..10)
        .map(|i| Step::ToolCall {
            tool: "probe",
            args: serde_json::json!({"n": i}),
        })
        .collect();
    let provider = MockProvider::new(steps);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    let calls = Arc::new(Mutex::new(Vec::new()));
    core.tools.register(Arc::new(CountingTool {
        name: "probe",
        calls: calls.clone(),
        reply: serde_json::json!({"status": "ok"}),
    }));

    let reply = send(&core, "deep", "dig in").await.unwrap();

    // Two rounds of model calls, two tool executions, verbatim results.
    assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 2);
    assert_eq!(calls.lock().len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert!(parsed.is_array());
    assert_eq!(parsed[0]["tool"], "probe");
    assert_eq!(parsed[0]["result"]["success"], true);
}

#[tokio::test]
async fn realtime_send_failure_falls_back_to_http() {
    let provider = MockProvider::new(vec![Step::Reply("hello from http")]);
    let (_dir, core) = test_core_with(
        provider.clone(),
        MockMemory::empty(),
        Arc::new(FailingRealtimeFactory),
        |_| {},
    );

    let reply = send(&core, "s1", "/live hello").await.unwrap();
    assert_eq!(reply, "hello from http");

    // The HTTP path saw the fallback-prefixed message.
    assert_eq!(
        provider.last_user_text().as_deref(),
        Some("[realtime-fallback] hello")
    );

    // The session stays live for the next turn.
    let meta = core.sessions.get("s1").unwrap();
    assert_eq!(meta.provider_type, ProviderType::Live);
    assert!(meta.last_realtime_activity.is_some());
}

#[tokio::test]
async fn empty_session_key_live_directive_goes_to_http() {
    let provider = MockProvider::new(vec![Step::Reply("plain http")]);
    let (_dir, core) = test_core_with(
        provider.clone(),
        MockMemory::empty(),
        Arc::new(FailingRealtimeFactory),
        |_| {},
    );

    let reply = send(&core, "", "/live hello").await.unwrap();
    assert_eq!(reply, "plain http");
    // No fallback prefix — the live path was never attempted.
    assert_eq!(provider.last_user_text().as_deref(), Some("/live hello"));
    // The turn landed on the default session.
    assert!(!core.log.read("default").unwrap().is_empty());
}

#[tokio::test]
async fn recall_trigger_injects_reranked_memories() {
    let hit = |content: &str, category: MemoryCategory, importance: f64, score: f64| SearchHit {
        entry: MemoryEntry {
            id: None,
            content: content.into(),
            category,
            importance,
            source: None,
            created_at: None,
        },
        score,
    };
    let memory = Arc::new(MockMemory {
        hits: vec![
            hit("M2 the fact", MemoryCategory::Fact, 0.8, 0.5),
            hit("M1 the decision", MemoryCategory::Decision, 0.8, 0.5),
        ],
        stored: Mutex::new(vec![]),
    });

    let provider = MockProvider::new(vec![Step::Reply("recalled")]);
    let (_dir, core) = test_core_with(
        provider.clone(),
        memory,
        Arc::new(NoRealtimeTransport),
        |c| {
            c.recall.limit = 1;
            c.recall.min_score = 0.3;
        },
    );

    let reply = send(&core, "s1", "recall what we decided").await.unwrap();
    assert_eq!(reply, "recalled");

    // With equal score and importance the decision boost wins the
    // single slot.
    let systems = provider.system_texts();
    let injected = systems
        .iter()
        .find(|s| s.starts_with("Relevant memories:"))
        .expect("recall block injected");
    assert!(injected.contains("M1 the decision"));
    assert!(!injected.contains("M2 the fact"));
}

#[tokio::test]
async fn failed_turn_persists_no_user_message() {
    let provider = MockProvider::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Fail, Step::Reply("recovered")]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    // First attempt: transport failure — nothing persisted.
    let err = send(&core, "s1", "please answer").await;
    assert!(err.is_err());
    assert!(core.log.read("s1").unwrap().is_empty());

    // Consume the remaining scripted failures so the retry succeeds.
    while matches!(
        provider.script.lock().front(),
        Some(Step::Fail)
    ) {
        let _ = send(&core, "s1", "please answer").await;
    }

    let reply = send(&core, "s1", "please answer").await.unwrap();
    assert_eq!(reply, "recovered");

    // Exactly one user message and one reply for the successful turn.
    let lines = core.log.read("s1").unwrap();
    let users = lines.iter().filter(|l| l.role == "user").count();
    assert_eq!(users, 1);
    assert_eq!(lines.last().unwrap().role, "assistant");
}

#[tokio::test]
async fn reset_archives_and_marks_session() {
    let provider = MockProvider::new(vec![Step::Reply("first"), Step::Reply("second")]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    send(&core, "s1", "hello").await.unwrap();
    let reply = send(&core, "s1", "/reset").await.unwrap();
    assert!(reply.contains("Session reset"));

    let lines = core.log.read("s1").unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].is_reset_marker());
    assert!(core.log.archive_stats("s1").archived_messages >= 2);

    // The key keeps working after the reset.
    let after = send(&core, "s1", "still there?").await.unwrap();
    assert_eq!(after, "second");
}

#[tokio::test]
async fn blocked_shell_command_is_refused_without_execution() {
    let provider = MockProvider::new(vec![]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    let reply = send(&core, "s1", "run sudo rm -rf /").await.unwrap();
    assert!(reply.starts_with("Command refused"));
    // The model was never consulted.
    assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shell_command_runs_and_returns_log() {
    let provider = MockProvider::new(vec![]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    let reply = send(&core, "s1", "run echo tether-e2e").await.unwrap();
    assert!(reply.contains("tether-e2e"));
}

#[tokio::test]
async fn task_split_executes_sequentially() {
    // First call answers the split, the next two answer the subtasks.
    let provider = MockProvider::new(vec![
        Step::Reply(r#"{"subtasks": ["first research step", "second writing step"]}"#),
        Step::Reply("research complete"),
        Step::Reply("writing complete"),
    ]);
    let (_dir, core) = test_core(provider.clone(), |_| {});

    let reply = send(&core, "s1", "/split write the quarterly report")
        .await
        .unwrap();
    assert!(reply.contains("2/2"));
    assert!(reply.contains("research complete"));
    assert!(reply.contains("---"));
    assert!(reply.contains("writing complete"));

    // The task is queryable afterwards.
    let listing = send(&core, "s1", "/task list").await.unwrap();
    assert!(listing.contains("task-"));
}
