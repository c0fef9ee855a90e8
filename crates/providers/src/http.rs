//! OpenAI-style chat adapter plus the dispatch policies layered on it:
//! retry with exponential backoff (honoring `Retry-After`), minimum
//! call spacing for rate-limited providers, context-window resolution,
//! and depth-scaled request timeouts for tool-result follow-ups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tether_domain::config::LlmConfig;
use tether_domain::error::{Error, Result};
use tether_domain::stream::{BoxStream, StreamEvent, Usage};
use tether_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::infer::ProviderKind;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// Backoff schedule between retries.
const RETRY_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Per-request timeout for tool-result follow-ups (depth > 0).
const FOLLOWUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpProvider {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
    default_timeout: Duration,
    /// Earliest instant the next paced call may start (rate-limit spacing).
    next_call_at: Mutex<Option<Instant>>,
    /// Cached resolved context window; 0 = not yet resolved.
    window: AtomicUsize,
    /// Configured override; wins over everything when set.
    context_override: Option<usize>,
}

impl HttpProvider {
    pub fn new(cfg: &LlmConfig, context_override: Option<usize>) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set (llm.api_key_env)",
                cfg.api_key_env
            ))
        })?;
        Self::with_key(cfg, context_override, api_key)
    }

    /// Construct with an explicit key (used by tests and key rotation).
    pub fn with_key(
        cfg: &LlmConfig,
        context_override: Option<usize>,
        api_key: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            kind: ProviderKind::from_base_url(&cfg.base_url),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            client,
            default_timeout: Duration::from_secs(cfg.http_timeout_secs),
            next_call_at: Mutex::new(None),
            window: AtomicUsize::new(0),
            context_override,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    // ── Call pacing ───────────────────────────────────────────────

    /// How long the caller must wait before the next paced call.
    fn pacing_delay(&self) -> Option<Duration> {
        self.kind.min_call_spacing()?;
        let next = *self.next_call_at.lock();
        let next = next?;
        let now = Instant::now();
        (next > now).then(|| next - now)
    }

    /// Advance the pacing tracker after a successful (2xx) call.
    fn advance_pacing(&self) {
        if let Some(spacing) = self.kind.min_call_spacing() {
            *self.next_call_at.lock() = Some(Instant::now() + spacing);
        }
    }

    // ── Single attempt ────────────────────────────────────────────

    async fn chat_once(
        &self,
        req: &ChatRequest,
        timeout: Duration,
    ) -> std::result::Result<ChatResponse, AttemptError> {
        if let Some(delay) = self.pacing_delay() {
            tokio::time::sleep(delay).await;
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        let resp = self
            .authed_post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = from_reqwest(e);
                if err.is_retryable() {
                    AttemptError::Retryable { err, retry_after: None }
                } else {
                    AttemptError::Fatal(err)
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            self.advance_pacing();
        } else {
            let retry_after = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            let err = Error::Provider {
                provider: self.kind.as_str().into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            };
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(AttemptError::Retryable { err, retry_after })
            } else {
                Err(AttemptError::Fatal(err))
            };
        }

        let resp_text = resp.text().await.map_err(|e| {
            AttemptError::Retryable { err: from_reqwest(e), retry_after: None }
        })?;
        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| AttemptError::Fatal(Error::Json(e)))?;
        parse_chat_response(self.kind.as_str(), &resp_json).map_err(AttemptError::Fatal)
    }

    // ── Retrying entry point ──────────────────────────────────────

    /// Send a chat request with the depth-aware timeout and retry policy.
    ///
    /// `depth` counts orchestrator recursion: tool-result follow-ups
    /// (depth > 0) get a short timeout so they stay snappy. Cancellation
    /// terminates the retry loop immediately.
    pub async fn chat_at_depth(
        &self,
        req: &ChatRequest,
        depth: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatResponse> {
        let timeout = if depth > 0 {
            FOLLOWUP_TIMEOUT
        } else {
            self.default_timeout
        };

        let mut attempt = 0usize;
        loop {
            match self.chat_once(req, timeout).await {
                Ok(resp) => return Ok(resp),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable { err, retry_after }) => {
                    if attempt >= RETRY_SCHEDULE.len() {
                        return Err(err);
                    }
                    let delay = retry_after.unwrap_or(RETRY_SCHEDULE[attempt]);
                    tracing::warn!(
                        provider = self.kind.as_str(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider error, retrying"
                    );
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = token.cancelled() => {
                                    return Err(Error::Timeout("request cancelled".into()));
                                }
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }

    // ── Context window ────────────────────────────────────────────

    /// Resolve the context window: configured override → model-info
    /// endpoint → static per-provider table. The resolved value is cached.
    pub async fn resolve_context_window(&self) -> usize {
        if let Some(n) = self.context_override {
            return n;
        }
        let cached = self.window.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }

        let resolved = match self.query_model_info().await {
            Some(n) if n > 0 => n,
            _ => self.kind.static_context_window(),
        };
        self.window.store(resolved, Ordering::Relaxed);
        resolved
    }

    async fn query_model_info(&self) -> Option<usize> {
        let url = format!("{}/models/{}", self.base_url, self.default_model);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        extract_context_window(&body)
    }
}

/// The model-info field naming varies by provider; check the usual spellings.
fn extract_context_window(body: &Value) -> Option<usize> {
    for key in [
        "context_window",
        "context_length",
        "max_context_length",
        "max_input_tokens",
    ] {
        if let Some(n) = body.get(key).and_then(|v| v.as_u64()) {
            return Some(n as usize);
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

enum AttemptError {
    Retryable { err: Error, retry_after: Option<Duration> },
    Fatal(Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_wire(msg),
        Role::Assistant => assistant_to_wire(msg),
        _ => {
            let text = msg.content.extract_all_text();
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": text,
            })
        }
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            for part in parts {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({
            "role": "tool",
            "tool_call_id": "",
            "content": t,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_native_tool_calls(message);
    let usage = body.get("usage").and_then(parse_wire_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
    })
}

/// Decode the provider-native `tool_calls` array: empty-named calls are
/// filtered out, and empty or malformed `arguments` normalize to `{}`.
pub fn parse_native_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            if tool_name.is_empty() {
                return None;
            }
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("");
            let arguments: Value = if args_str.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()))
            };
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_sse_data(data: &str) -> Option<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return None;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    if choice.is_none() {
        if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
            return Some(Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            }));
        }
        return None;
    }

    let choice = choice?;
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_wire_usage);
        return Some(Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        }));
    }

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let idx_str = tc
                .get("index")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                .to_string();

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                return Some(Ok(StreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                return Some(Ok(StreamEvent::ToolCallDelta {
                    call_id: idx_str,
                    delta: args.to_string(),
                }));
            }
        }
    }

    // Reasoning content (DeepSeek-style).
    if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return Some(Ok(StreamEvent::Thinking { text: text.to_string() }));
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return Some(Ok(StreamEvent::Token { text: text.to_string() }));
        }
    }

    None
}

fn parse_sse_data_vec(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }
    match parse_sse_data(data) {
        Some(event) => vec![event],
        None => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.chat_at_depth(req, 0, None).await
    }

    async fn chat_with_depth(&self, req: &ChatRequest, depth: u32) -> Result<ChatResponse> {
        self.chat_at_depth(req, depth, None).await
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        if let Some(delay) = self.pacing_delay() {
            tokio::time::sleep(delay).await;
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = self.kind.as_str(), url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.kind.as_str().into(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }
        self.advance_pacing();

        Ok(crate::sse::sse_response_stream(resp, parse_sse_data_vec))
    }

    async fn context_window(&self) -> usize {
        self.resolve_context_window().await
    }

    fn provider_id(&self) -> &str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn native_calls_round_trip() {
        // Round-trip law: parse(emit(T)) == T for valid-JSON arguments.
        let original = vec![
            tc("tc_1", "read", serde_json::json!({"path": "/tmp/a"})),
            tc("tc_2", "exec", serde_json::json!({"command": "ls -la"})),
        ];
        let msg = Message::assistant_with_calls("", &original);
        let wire = assistant_to_wire(&msg);
        let parsed = parse_native_tool_calls(&wire);
        assert_eq!(parsed, original);
    }

    #[test]
    fn native_filters_empty_names() {
        let message = serde_json::json!({
            "tool_calls": [
                {"id": "a", "function": {"name": "", "arguments": "{}"}},
                {"id": "b", "function": {"name": "read", "arguments": "{\"path\":\"x\"}"}},
            ]
        });
        let calls = parse_native_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read");
    }

    #[test]
    fn native_normalizes_empty_and_invalid_args() {
        let message = serde_json::json!({
            "tool_calls": [
                {"id": "a", "function": {"name": "read", "arguments": ""}},
                {"id": "b", "function": {"name": "write", "arguments": "not json"}},
            ]
        });
        let calls = parse_native_tool_calls(&message);
        assert_eq!(calls[0].arguments, serde_json::json!({}));
        assert_eq!(calls[1].arguments, serde_json::json!({}));
    }

    #[test]
    fn tool_result_wire_shape() {
        let msg = Message::tool_result("tc_9", "output text");
        let wire = tool_result_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "tc_9");
        assert_eq!(wire["content"], "output text");
    }

    #[test]
    fn chat_response_parses_content_and_usage() {
        let body = serde_json::json!({
            "model": "test-model",
            "choices": [{
                "message": {"content": "hi there"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        let resp = parse_chat_response("openai", &body).unwrap();
        assert_eq!(resp.content, "hi there");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn chat_response_no_choices_is_error() {
        let body = serde_json::json!({"choices": []});
        assert!(parse_chat_response("openai", &body).is_err());
    }

    #[test]
    fn extract_context_window_field_variants() {
        for key in ["context_window", "context_length", "max_context_length"] {
            let body = serde_json::json!({key: 32768});
            assert_eq!(extract_context_window(&body), Some(32_768));
        }
        assert_eq!(extract_context_window(&serde_json::json!({})), None);
    }

    #[test]
    fn sse_token_delta() {
        let data = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        match parse_sse_data(data) {
            Some(Ok(StreamEvent::Token { text })) => assert_eq!(text, "hel"),
            other => panic!("expected Token, got {other:?}"),
        }
    }

    #[test]
    fn sse_done_sentinel() {
        let events = parse_sse_data_vec("[DONE]");
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn sse_tool_call_started() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_1","function":{"name":"read"}}]}}]}"#;
        match parse_sse_data(data) {
            Some(Ok(StreamEvent::ToolCallStarted { call_id, tool_name })) => {
                assert_eq!(call_id, "tc_1");
                assert_eq!(tool_name, "read");
            }
            other => panic!("expected ToolCallStarted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn context_override_wins() {
        let cfg = LlmConfig::default();
        let p = HttpProvider::with_key(&cfg, Some(4096), "test-key".into()).unwrap();
        assert_eq!(p.resolve_context_window().await, 4096);
    }

    #[test]
    fn pacing_only_for_anthropic() {
        let mut cfg = LlmConfig::default();
        cfg.base_url = "https://api.anthropic.com/v1".into();
        let p = HttpProvider::with_key(&cfg, None, "k".into()).unwrap();
        assert!(p.pacing_delay().is_none()); // nothing recorded yet
        p.advance_pacing();
        assert!(p.pacing_delay().is_some());

        let mut cfg = LlmConfig::default();
        cfg.base_url = "https://api.openai.com/v1".into();
        let p = HttpProvider::with_key(&cfg, None, "k".into()).unwrap();
        p.advance_pacing();
        assert!(p.pacing_delay().is_none());
    }
}
