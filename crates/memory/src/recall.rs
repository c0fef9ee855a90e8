//! Memory recall and auto-capture.
//!
//! Recall queries the vector store for twice the configured limit,
//! reranks by `score · (1 + importance) · (1 + category boost)`, and
//! formats the survivors as a Markdown list for system-role injection.
//!
//! Auto-capture stores capture-worthy user statements (with a
//! near-duplicate check) and surfaces a soft flush trigger throttled to
//! once per 200 messages and no more often than every ten minutes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tether_domain::config::RecallConfig;

use crate::provider::VectorMemory;
use crate::types::{MemoryCategory, SearchHit};

/// Similarity at which a candidate counts as an existing duplicate.
const DUPLICATE_SCORE: f64 = 0.95;
/// Importance assigned to auto-captured memories.
const AUTO_CAPTURE_IMPORTANCE: f64 = 0.6;

pub struct Recaller {
    memory: Arc<dyn VectorMemory>,
    cfg: RecallConfig,
    throttle: CaptureThrottle,
}

impl Recaller {
    pub fn new(memory: Arc<dyn VectorMemory>, cfg: RecallConfig) -> Self {
        Self {
            memory,
            cfg,
            throttle: CaptureThrottle::default(),
        }
    }

    /// Query, rerank, and format memories for the given prompt.
    /// Returns an empty string when nothing clears the score floor.
    pub async fn recall(&self, prompt: &str) -> String {
        let candidates = match self
            .memory
            .search(prompt, self.cfg.limit * 2, self.cfg.min_score)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "memory search failed, skipping recall");
                return String::new();
            }
        };
        if candidates.is_empty() {
            return String::new();
        }

        let ranked = rerank(candidates, self.cfg.limit);
        format_for_injection(&ranked)
    }

    /// Consider a user message for auto-capture. Fire-and-forget: all
    /// failures are logged and swallowed.
    pub async fn observe(&self, message: &str) {
        self.throttle.count_message();

        if !capture_worthy(message) {
            return;
        }

        // Skip near-duplicates of something already stored.
        match self.memory.search(message, 1, DUPLICATE_SCORE).await {
            Ok(hits) if !hits.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "duplicate lookup failed, skipping capture");
                return;
            }
        }

        let category = infer_category(message);
        if let Err(e) = self
            .memory
            .store_with_source(message, category, AUTO_CAPTURE_IMPORTANCE, "auto_capture")
            .await
        {
            tracing::warn!(error = %e, "auto-capture store failed");
        }
    }

    /// Whether the soft flush trigger fired on the most recent message.
    pub fn should_flush(&self) -> bool {
        self.throttle.should_flush()
    }
}

/// Rerank hits by weighted score and keep the top `limit`.
pub fn rerank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        weighted(b)
            .partial_cmp(&weighted(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

fn weighted(hit: &SearchHit) -> f64 {
    hit.score * (1.0 + hit.entry.importance) * (1.0 + hit.entry.category.boost())
}

fn format_for_injection(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant memories:\n");
    for hit in hits {
        out.push_str("- ");
        out.push_str(hit.entry.content.trim());
        out.push('\n');
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capture heuristics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CAPTURE_MARKERS: [&str; 10] = [
    "my name",
    "i prefer",
    "i like",
    "i live",
    "i work",
    "i use",
    "we decided",
    "remember that",
    "always",
    "never",
];

/// A message is capture-worthy when it reads like a durable statement
/// about the user or their decisions, not a command or a question.
pub fn capture_worthy(message: &str) -> bool {
    let trimmed = message.trim();
    if trimmed.len() < 12 || trimmed.starts_with('/') || trimmed.ends_with('?') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    CAPTURE_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn infer_category(message: &str) -> MemoryCategory {
    let lower = message.to_lowercase();
    if lower.contains("decided") || lower.contains("decision") || lower.contains("we will") {
        MemoryCategory::Decision
    } else if lower.contains("prefer") || lower.contains("favorite") || lower.contains("i like") {
        MemoryCategory::Preference
    } else if lower.contains(" is a ") || lower.contains(" works at ") {
        MemoryCategory::Entity
    } else {
        MemoryCategory::Fact
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flush throttle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Soft flush trigger: fires after every 200 observed messages, but not
/// more often than every ten minutes.
pub struct CaptureThrottle {
    inner: Mutex<ThrottleState>,
    every: u64,
    min_interval: Duration,
}

struct ThrottleState {
    since_flush: u64,
    last_flush: Option<Instant>,
}

impl Default for CaptureThrottle {
    fn default() -> Self {
        Self::new(200, Duration::from_secs(600))
    }
}

impl CaptureThrottle {
    pub fn new(every: u64, min_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(ThrottleState {
                since_flush: 0,
                last_flush: None,
            }),
            every,
            min_interval,
        }
    }

    pub fn count_message(&self) {
        self.inner.lock().since_flush += 1;
    }

    pub fn should_flush(&self) -> bool {
        let mut state = self.inner.lock();
        if state.since_flush < self.every {
            return false;
        }
        if let Some(last) = state.last_flush {
            if last.elapsed() < self.min_interval {
                return false;
            }
        }
        state.since_flush = 0;
        state.last_flush = Some(Instant::now());
        true
    }
}
