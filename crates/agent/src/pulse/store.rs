//! Pulse event store.
//!
//! Events are persisted to `pulse_events.json` under the state path.
//! The queue is priority-then-FIFO: the next pending event is the one
//! with the numerically lowest priority, ties broken by stored id.
//! Claiming is a compare-and-swap on status so exactly one worker owns
//! an in-flight event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use tether_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    ProcessingLlm,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::CompletedWithErrors | EventStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseEvent {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub priority: Priority,
    /// Delivery channel; `""` fans out to all, `"last"` targets the
    /// last-active channel.
    #[serde(default)]
    pub channel: String,
    /// Free-form event type; `hook:`-prefixed events route to the hook
    /// registry.
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    /// Response text recorded on completion.
    #[serde(default)]
    pub response: Option<String>,
}

impl PulseEvent {
    pub fn is_hook_event(&self) -> bool {
        self.event_type.starts_with("hook:")
    }
}

/// Fields callers provide when enqueueing.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub title: String,
    pub content: String,
    pub priority: Priority,
    pub channel: String,
    pub event_type: String,
    pub metadata: serde_json::Value,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            priority,
            channel: String::new(),
            event_type: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PulseStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    max_pending: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreState {
    next_id: u64,
    events: Vec<PulseEvent>,
}

impl PulseStore {
    pub fn new(state_path: &Path, max_pending: usize) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("pulse_events.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            StoreState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            max_pending,
        })
    }

    /// Enqueue a new pending event. Fails when the pending queue is full.
    pub async fn enqueue(&self, draft: EventDraft) -> Result<PulseEvent> {
        let mut state = self.state.write().await;

        let pending = state
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Pending)
            .count();
        if pending >= self.max_pending {
            return Err(Error::Busy(format!(
                "pulse queue full ({pending}/{})",
                self.max_pending
            )));
        }

        state.next_id += 1;
        let event = PulseEvent {
            id: state.next_id,
            title: draft.title,
            content: draft.content,
            priority: draft.priority,
            channel: draft.channel,
            event_type: draft.event_type,
            metadata: draft.metadata,
            status: EventStatus::Pending,
            created_at: Utc::now(),
            response: None,
        };
        state.events.push(event.clone());
        self.persist(&state);
        Ok(event)
    }

    /// The next pending event by priority, ties broken FIFO by id.
    pub async fn peek_next_pending(&self) -> Option<PulseEvent> {
        let state = self.state.read().await;
        state
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Pending)
            .min_by_key(|e| (e.priority, e.id))
            .cloned()
    }

    /// Atomically claim an event: CAS `Pending → Processing`. Returns
    /// `false` when the event is gone or another worker won.
    pub async fn claim(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        let claimed = match state.events.iter_mut().find(|e| e.id == id) {
            Some(e) if e.status == EventStatus::Pending => {
                e.status = EventStatus::Processing;
                true
            }
            _ => false,
        };
        if claimed {
            self.persist(&state);
        }
        claimed
    }

    /// Update an event's status, optionally recording a response.
    pub async fn set_status(&self, id: u64, status: EventStatus, response: Option<String>) {
        let mut state = self.state.write().await;
        if let Some(e) = state.events.iter_mut().find(|e| e.id == id) {
            e.status = status;
            if response.is_some() {
                e.response = response;
            }
        }
        self.persist(&state);
    }

    pub async fn get(&self, id: u64) -> Option<PulseEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn count_by_status(&self) -> HashMap<EventStatus, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for e in &state.events {
            *counts.entry(e.status).or_insert(0) += 1;
        }
        counts
    }

    /// Purge terminal events older than `hours`. Returns how many were
    /// removed.
    pub async fn cleanup_older_than(&self, hours: u64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        let mut state = self.state.write().await;
        let before = state.events.len();
        state
            .events
            .retain(|e| !(e.status.is_terminal() && e.created_at < cutoff));
        let removed = before - state.events.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    /// Best-effort persistence; a failed write never fails the caller.
    fn persist(&self, state: &StoreState) {
        match serde_json::to_string_pretty(state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "failed to persist pulse events");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize pulse events"),
        }
    }
}
