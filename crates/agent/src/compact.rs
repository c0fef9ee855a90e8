//! Session compaction — collapses old history into a summary message so
//! the context window stays healthy after many turns.
//!
//! Compaction archives the cut messages (bounded by the session's
//! watermark), clears the live log, re-inserts the kept tail, and
//! prepends one `system` message carrying `"[summary]\n" + summary`.
//! The whole operation runs under a process-wide mutex: concurrent
//! attempts skip instead of queueing.

use std::sync::Arc;

use tokio::sync::Mutex;

use tether_domain::config::CompactionConfig;
use tether_domain::error::{Error, Result};
use tether_providers::{ChatRequest, LlmProvider};
use tether_sessions::{MessageLog, SessionStore, StoredMessage};

use crate::context::estimate::TokenEstimator;

/// LLM summary parameters.
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 2_048;
/// Per-message cap in the deterministic fallback summary.
const FALLBACK_SNIPPET_CHARS: usize = 200;

pub struct Compactor {
    log: Arc<MessageLog>,
    sessions: Arc<SessionStore>,
    provider: Arc<dyn LlmProvider>,
    cfg: CompactionConfig,
    /// Process-wide gate; `try_lock` keeps concurrent attempts from queueing.
    gate: Mutex<()>,
}

impl Compactor {
    pub fn new(
        log: Arc<MessageLog>,
        sessions: Arc<SessionStore>,
        provider: Arc<dyn LlmProvider>,
        cfg: CompactionConfig,
    ) -> Self {
        Self {
            log,
            sessions,
            provider,
            cfg,
            gate: Mutex::new(()),
        }
    }

    pub fn keep_messages(&self) -> usize {
        self.cfg.keep_messages
    }

    /// Whether the stored history warrants compaction.
    pub fn should_compact(&self, stored_tokens: usize, window: usize, message_count: usize) -> bool {
        stored_tokens as f64 >= self.cfg.threshold * window as f64
            && message_count > self.cfg.keep_messages
    }

    /// Spawn a compaction pass in the background. The returned receiver
    /// resolves with the pass result; callers bound their own wait (the
    /// context manager waits 2 s, `/compact` waits 30 s) and the work
    /// keeps running if they stop waiting.
    pub fn spawn(
        self: &Arc<Self>,
        session_key: &str,
        estimator: Arc<TokenEstimator>,
        instructions: Option<String>,
    ) -> tokio::sync::oneshot::Receiver<bool> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let compactor = self.clone();
        let key = session_key.to_owned();
        tokio::spawn(async move {
            let ran = match compactor.run(&key, &estimator, instructions.as_deref()).await {
                Ok(ran) => ran,
                Err(e) => {
                    tracing::warn!(session_key = %key, error = %e, "compaction failed");
                    false
                }
            };
            let _ = tx.send(ran);
        });
        rx
    }

    /// Run one compaction pass now. Returns `Ok(false)` when there is
    /// nothing to do or another pass holds the gate.
    pub async fn run(
        &self,
        session_key: &str,
        estimator: &TokenEstimator,
        instructions: Option<&str>,
    ) -> Result<bool> {
        let _guard = match self.gate.try_lock() {
            Ok(g) => g,
            Err(_) => {
                tracing::warn!(session_key, "compaction busy, skipping");
                return Ok(false);
            }
        };

        let stored = self.log.read(session_key)?;
        let count = stored.len();
        if count <= self.cfg.keep_messages {
            return Ok(false);
        }

        let cut = &stored[..count - self.cfg.keep_messages];
        let kept: Vec<StoredMessage> = stored[count - self.cfg.keep_messages..].to_vec();
        let turns_compacted = cut.len();
        let cut_last_id = cut.last().map(|m| m.id).unwrap_or(0);

        // Summarize before touching storage so a provider failure leaves
        // the log intact (the deterministic fallback makes this rare).
        let summary = match self.generate_summary(cut, instructions).await {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) | Err(_) => fallback_summary(cut),
        };

        // Archive the cut, bounded by the watermark.
        self.log.archive_through(session_key, cut_last_id)?;

        // Clear and re-insert: summary first, then the kept tail.
        self.log.replace(session_key, &[])?;
        self.log.append(
            session_key,
            "system",
            &format!("[summary]\n{summary}"),
            Some(serde_json::json!({
                "summary": true,
                "covered_through": cut_last_id,
            })),
        )?;
        for line in &kept {
            self.log
                .append(session_key, &line.role, &line.content, line.metadata.clone())?;
        }

        // Refresh metadata.
        let token_estimate = {
            let lines = self.log.read(session_key)?;
            lines
                .iter()
                .map(|l| estimator.estimate_text(&l.content) + 4)
                .sum::<usize>() as u64
        };
        self.sessions.update(session_key, |m| {
            m.compaction_count += 1;
            m.last_summary = Some(summary.clone());
            m.last_compacted_id = cut_last_id;
            m.token_estimate = token_estimate;
        });

        tracing::info!(
            session_key,
            turns_compacted,
            summary_len = summary.len(),
            "session compacted"
        );

        Ok(true)
    }

    async fn generate_summary(
        &self,
        cut: &[StoredMessage],
        instructions: Option<&str>,
    ) -> Result<String> {
        let conversation = build_conversation_text(cut);

        let extra = instructions
            .filter(|i| !i.trim().is_empty())
            .map(|i| format!("\nAdditional instructions from the user: {i}\n"))
            .unwrap_or_default();

        let prompt = format!(
            "You are a conversation summarizer. Summarize the following conversation \
             history into a concise summary that preserves:\n\
             1. The current goal or plan being worked on\n\
             2. Key decisions made\n\
             3. Open questions or threads\n\
             4. Important facts learned about the user or context\n\
             5. Tool state (running processes, active sessions, pending work)\n\n\
             Be concise but preserve all actionable context. Write in present tense.\n\
             Omit greetings and pleasantries. Focus on substance.\n{extra}\n\
             CONVERSATION:\n{conversation}"
        );

        let req = ChatRequest {
            messages: vec![tether_domain::tool::Message::user(prompt)],
            tools: vec![],
            temperature: Some(SUMMARY_TEMPERATURE),
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            json_mode: false,
            model: None,
        };

        let resp = self.provider.chat(&req).await?;
        if resp.content.trim().is_empty() {
            return Err(Error::Provider {
                provider: self.provider.provider_id().into(),
                message: "empty summary".into(),
            });
        }
        Ok(resp.content)
    }
}

/// Deterministic summary used when the LLM call fails: `role: content…`
/// with a per-message cap.
fn fallback_summary(cut: &[StoredMessage]) -> String {
    let mut out = String::new();
    for line in cut {
        out.push_str(&line.role);
        out.push_str(": ");
        let content = line.content.trim();
        if content.len() > FALLBACK_SNIPPET_CHARS {
            let mut end = FALLBACK_SNIPPET_CHARS;
            while end > 0 && !content.is_char_boundary(end) {
                end -= 1;
            }
            out.push_str(&content[..end]);
            out.push('…');
        } else {
            out.push_str(content);
        }
        out.push('\n');
    }
    out
}

fn build_conversation_text(lines: &[StoredMessage]) -> String {
    let mut buf = String::new();
    for line in lines {
        let role_label = match line.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            "system" => "System",
            other => other,
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        // Cap very long lines (tool results) to keep the prompt manageable.
        if line.content.len() > 2000 {
            let head_end = floor_boundary(&line.content, 1000);
            let tail_start = ceil_boundary(&line.content, line.content.len() - 500);
            buf.push_str(&line.content[..head_end]);
            buf.push_str(" [...] ");
            buf.push_str(&line.content[tail_start..]);
        } else {
            buf.push_str(&line.content);
        }
        buf.push('\n');
    }
    buf
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
