use std::sync::Arc;

use tether_domain::error::Result;
use tether_domain::stream::{BoxStream, StreamEvent, Usage};
use tether_domain::tool::{Message, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// When `true`, request the model to respond with valid JSON only.
    pub json_mode: bool,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information.
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// The reason the model stopped generating (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The uniform chat facade every LLM adapter implements.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Depth-aware variant used by the tool orchestrator: follow-up
    /// rounds (depth > 0) may tighten timeouts. The default ignores
    /// depth.
    async fn chat_with_depth(&self, req: &ChatRequest, _depth: u32) -> Result<ChatResponse> {
        self.chat(req).await
    }

    /// Send a chat completion request and return a stream of events.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Provider-advertised context window for the active model, in tokens.
    async fn context_window(&self) -> usize;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Realtime (live) sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for opening one live connection.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub api_key: String,
    pub model: String,
}

pub type TextCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Capability set of a bidirectional live connection.
///
/// The wire transport (websocket framing, audio codecs) belongs to the
/// concrete implementation; the core only drives this surface.
#[async_trait::async_trait]
pub trait RealtimeProvider: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_audio(&self, bytes: &[u8]) -> Result<()>;
    async fn end_audio(&self) -> Result<()>;

    fn on_text(&self, cb: TextCallback);
    fn on_error(&self, cb: TextCallback);
    fn on_disconnect(&self, cb: DisconnectCallback);
}

/// Opens live connections. The default deployment wires a concrete
/// transport here; tests inject doubles.
pub trait RealtimeFactory: Send + Sync {
    fn open(&self, settings: RealtimeSettings) -> Result<Arc<dyn RealtimeProvider>>;
}

/// A factory for deployments without a live transport: every open fails,
/// which pushes the session manager down its HTTP fallback path.
pub struct NoRealtimeTransport;

impl RealtimeFactory for NoRealtimeTransport {
    fn open(&self, _settings: RealtimeSettings) -> Result<Arc<dyn RealtimeProvider>> {
        Err(tether_domain::Error::Provider {
            provider: "realtime".into(),
            message: "no realtime transport configured".into(),
        })
    }
}
