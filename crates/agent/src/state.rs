//! The composition root. [`AgentCore`] owns every collaborator as an
//! explicit field and exposes them through narrow interfaces; background
//! work (pulse loop, realtime janitor) hangs off the shared shutdown
//! token with explicit start/stop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tether_domain::config::Config;
use tether_domain::error::Result;
use tether_memory::{Recaller, VectorMemory};
use tether_providers::{LlmProvider, RealtimeFactory};
use tether_sessions::{MessageLog, SessionStore};
use tether_tools::exec::ExecTool;
use tether_tools::file_ops::{EditTool, ReadTool, WriteTool};
use tether_tools::process::ProcessTool;
use tether_tools::{LoopDetector, ProcessManager, ToolRegistry};

use crate::compact::Compactor;
use crate::context::estimate::TokenEstimator;
use crate::pulse::{EventStatus, Priority, PulseEvent, PulseHost};
use crate::realtime::RealtimeManager;
use crate::tasks::TaskManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel broadcast contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel delivery. `channel = ""` fans out to all channels; `"last"`
/// targets the last-active one. Channel adapters live behind this
/// contract.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, message: &str, priority: Priority, channel: &str) -> Result<()>;
}

/// Default broadcaster for deployments without channel adapters: the
/// message lands in the structured log.
pub struct LogBroadcaster;

#[async_trait::async_trait]
impl Broadcaster for LogBroadcaster {
    async fn broadcast(&self, message: &str, priority: Priority, channel: &str) -> Result<()> {
        tracing::info!(?priority, channel, message, "broadcast");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentCore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AgentCore {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub recaller: Arc<Recaller>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionStore>,
    pub log: Arc<MessageLog>,
    pub loop_guard: Arc<LoopDetector>,
    pub processes: Arc<ProcessManager>,
    pub tasks: Arc<TaskManager>,
    pub compactor: Arc<Compactor>,
    pub estimator: Arc<TokenEstimator>,
    pub realtime: Arc<RealtimeManager>,
    pub shutdown: CancellationToken,
}

impl AgentCore {
    /// Wire the core from config plus the injected externals (model
    /// provider, vector memory, realtime transport).
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        memory: Arc<dyn VectorMemory>,
        realtime_factory: Arc<dyn RealtimeFactory>,
    ) -> Result<Self> {
        let state_path = config.storage.state_path.clone();

        let log = Arc::new(MessageLog::new(&state_path.join("messages"))?);
        let sessions = Arc::new(SessionStore::new(&state_path)?);
        let estimator = Arc::new(TokenEstimator::new());

        let processes = Arc::new(ProcessManager::new());
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(ExecTool));
        tools.register(Arc::new(ProcessTool::new(processes.clone())));
        tools.register(Arc::new(ReadTool));
        tools.register(Arc::new(WriteTool));
        tools.register(Arc::new(EditTool));

        let compactor = Arc::new(Compactor::new(
            log.clone(),
            sessions.clone(),
            provider.clone(),
            config.compaction.clone(),
        ));
        let recaller = Arc::new(Recaller::new(memory, config.recall.clone()));
        let tasks = Arc::new(TaskManager::new(&state_path, provider.clone())?);
        let loop_guard = Arc::new(LoopDetector::new(config.tool_loop.clone()));
        let realtime = Arc::new(RealtimeManager::new(
            realtime_factory,
            config.realtime.clone(),
        ));

        Ok(Self {
            config,
            provider,
            recaller,
            tools,
            sessions,
            log,
            loop_guard,
            processes,
            tasks,
            compactor,
            estimator,
            realtime,
            shutdown: CancellationToken::new(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PulseHost implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The agent's side of the scheduler contract: LLM processing re-enters
/// through the session router; broadcasts go to the channel layer.
pub struct AgentPulseHost {
    core: AgentCore,
    broadcaster: Arc<dyn Broadcaster>,
}

impl AgentPulseHost {
    pub fn new(core: AgentCore, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { core, broadcaster }
    }
}

#[async_trait::async_trait]
impl PulseHost for AgentPulseHost {
    async fn process_event(&self, event: &PulseEvent) -> Result<String> {
        let session_key = event
            .metadata
            .get("session_key")
            .and_then(|v| v.as_str())
            .unwrap_or(crate::router::DEFAULT_SESSION_KEY)
            .to_string();

        crate::router::handle_message(
            &self.core,
            crate::router::TurnRequest {
                session_key,
                message: event.content.clone(),
                on_chunk: None,
            },
        )
        .await
    }

    async fn broadcast(&self, message: &str, priority: Priority, channel: &str) -> Result<()> {
        self.broadcaster.broadcast(message, priority, channel).await
    }

    fn on_event_complete(&self, event: &PulseEvent, status: EventStatus) {
        tracing::debug!(event_id = event.id, ?status, "pulse event complete");
    }
}
