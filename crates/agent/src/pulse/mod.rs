//! Pulse scheduler — the event-driven heartbeat of the agent.
//!
//! A ticker fires every `interval`. Each tick peeks the next pending
//! event (priority, then FIFO), decides eligibility against the current
//! processing state, and only then claims it (CAS on status), so
//! ineligible events are never claimed. Criticals broadcast
//! synchronously to all channels; highs route `hook:` events to the
//! hook registry and everything else to their channel; normals and lows
//! move to `processing_llm` and run on tracked background tasks with
//! panic isolation and shutdown cancellation.
//!
//! The scheduler depends on its host through the one-way [`PulseHost`]
//! trait; the agent implements it, so no cyclic callbacks exist.

pub mod hooks;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tether_domain::config::PulseConfig;
use tether_domain::error::Result;
use tether_sessions::{MessageLog, SessionStore};

pub use hooks::{HookEvent, HookHandler, HookRegistry, HookRequirements, PulseHook};
pub use store::{EventDraft, EventStatus, Priority, PulseEvent, PulseStore};

/// Terminal-status cleanup cadence inside the main loop.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// What the scheduler needs from the agent. One-way dependency: the
/// agent implements this and hands itself to the scheduler at
/// construction.
#[async_trait::async_trait]
pub trait PulseHost: Send + Sync {
    /// Process a normal/low event through the model, returning the
    /// response text.
    async fn process_event(&self, event: &PulseEvent) -> Result<String>;

    /// Deliver a message to a channel. `""` fans out to all channels,
    /// `"last"` targets the last-active one.
    async fn broadcast(&self, message: &str, priority: Priority, channel: &str) -> Result<()>;

    /// Observer invoked when an event reaches a terminal status.
    fn on_event_complete(&self, _event: &PulseEvent, _status: EventStatus) {}
}

/// Preemption rules: criticals always run; highs run unless a critical
/// is processing; normals and lows only run when idle.
fn eligible(incoming: Priority, current: Option<Priority>) -> bool {
    match current {
        None => true,
        Some(Priority::Critical) => incoming == Priority::Critical,
        Some(_) => matches!(incoming, Priority::Critical | Priority::High),
    }
}

struct Inner {
    store: Arc<PulseStore>,
    hooks: Arc<HookRegistry>,
    host: Arc<dyn PulseHost>,
    sessions: Arc<SessionStore>,
    log: Arc<MessageLog>,
    cfg: PulseConfig,
    shutdown: CancellationToken,
    /// Priority currently being processed synchronously, if any.
    processing: Mutex<Option<Priority>>,
    /// Forces an immediate tick (webhook `wake?mode=now`).
    trigger: Notify,
    /// Tracks background LLM tasks so shutdown can drain them.
    tracker: TaskTracker,
    last_cleanup: Mutex<Instant>,
}

#[derive(Clone)]
pub struct PulseScheduler {
    inner: Arc<Inner>,
}

impl PulseScheduler {
    pub fn new(
        store: Arc<PulseStore>,
        hooks: Arc<HookRegistry>,
        host: Arc<dyn PulseHost>,
        sessions: Arc<SessionStore>,
        log: Arc<MessageLog>,
        cfg: PulseConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                hooks,
                host,
                sessions,
                log,
                cfg,
                shutdown,
                processing: Mutex::new(None),
                trigger: Notify::new(),
                tracker: TaskTracker::new(),
                last_cleanup: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<PulseStore> {
        &self.inner.store
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.inner.hooks
    }

    /// Enqueue a new event for the next eligible tick.
    pub async fn enqueue(&self, draft: EventDraft) -> Result<PulseEvent> {
        self.inner.store.enqueue(draft).await
    }

    /// Force an immediate tick.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    /// Start the main loop. Returns immediately; the loop exits only via
    /// the shutdown token.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if !inner.cfg.enabled {
                tracing::info!("pulse scheduler disabled by config");
                return;
            }
            let mut ticker =
                tokio::time::interval(Duration::from_millis(inner.cfg.interval_ms.max(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms = inner.cfg.interval_ms, "pulse scheduler started");

            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = inner.trigger.notified() => {}
                }
                Self::tick_once(&inner).await;
                Self::maybe_housekeep(&inner).await;
            }
            tracing::info!("pulse scheduler stopped");
        })
    }

    /// Stop the scheduler: cancel the shutdown context and wait for all
    /// background event tasks to drain.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    // ── Tick ──────────────────────────────────────────────────────

    async fn tick_once(inner: &Arc<Inner>) {
        let Some(event) = inner.store.peek_next_pending().await else {
            return;
        };

        let current = *inner.processing.lock();
        if !eligible(event.priority, current) {
            return;
        }

        // Claim only after eligibility — ineligible events stay pending
        // and claimable by a later tick.
        if !inner.store.claim(event.id).await {
            return;
        }

        match event.priority {
            Priority::Critical => Self::dispatch_critical(inner, &event).await,
            Priority::High => Self::dispatch_high(inner, &event).await,
            Priority::Normal | Priority::Low => Self::dispatch_llm(inner, event).await,
        }
    }

    async fn dispatch_critical(inner: &Arc<Inner>, event: &PulseEvent) {
        *inner.processing.lock() = Some(Priority::Critical);

        let message = format!("[CRITICAL]: {}\n\n{}", event.title, event.content);
        let status = match inner.host.broadcast(&message, Priority::Critical, "").await {
            Ok(()) => EventStatus::Completed,
            Err(e) => {
                tracing::warn!(event_id = event.id, error = %e, "critical broadcast failed");
                EventStatus::CompletedWithErrors
            }
        };
        inner.store.set_status(event.id, status, None).await;

        *inner.processing.lock() = None;
        inner.host.on_event_complete(event, status);
    }

    async fn dispatch_high(inner: &Arc<Inner>, event: &PulseEvent) {
        *inner.processing.lock() = Some(Priority::High);

        let status = if event.is_hook_event() {
            inner.hooks.dispatch(HookEvent {
                event_type: event
                    .event_type
                    .strip_prefix("hook:")
                    .unwrap_or(&event.event_type)
                    .to_string(),
                action: event.title.clone(),
                session_key: event
                    .metadata
                    .get("session_key")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                timestamp: Utc::now(),
                context: event.metadata.clone(),
            });
            EventStatus::Completed
        } else {
            match inner
                .host
                .broadcast(&event.content, Priority::High, &event.channel)
                .await
            {
                Ok(()) => EventStatus::Completed,
                Err(e) => {
                    tracing::warn!(event_id = event.id, error = %e, "high broadcast failed");
                    EventStatus::CompletedWithErrors
                }
            }
        };
        inner.store.set_status(event.id, status, None).await;

        *inner.processing.lock() = None;
        inner.host.on_event_complete(event, status);
    }

    async fn dispatch_llm(inner: &Arc<Inner>, event: PulseEvent) {
        if !inner.cfg.llm_enabled {
            // No LLM lane configured: deliver the content as a plain
            // channel message instead.
            let status = match inner
                .host
                .broadcast(&event.content, event.priority, &event.channel)
                .await
            {
                Ok(()) => EventStatus::Completed,
                Err(_) => EventStatus::CompletedWithErrors,
            };
            inner.store.set_status(event.id, status, None).await;
            inner.host.on_event_complete(&event, status);
            return;
        }

        inner
            .store
            .set_status(event.id, EventStatus::ProcessingLlm, None)
            .await;
        // Release the processing slot before the background work starts
        // so the scheduler can keep claiming eligible events.
        *inner.processing.lock() = None;

        let store = inner.store.clone();
        let host = inner.host.clone();
        let shutdown = inner.shutdown.clone();
        inner.tracker.spawn(async move {
            let work = {
                let host = host.clone();
                let event = event.clone();
                async move {
                    std::panic::AssertUnwindSafe(host.process_event(&event))
                        .catch_unwind()
                        .await
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => {
                    store
                        .set_status(event.id, EventStatus::Cancelled, None)
                        .await;
                    host.on_event_complete(&event, EventStatus::Cancelled);
                }
                result = work => {
                    let (status, response) = match result {
                        Ok(Ok(text)) => (EventStatus::Completed, Some(text)),
                        Ok(Err(e)) => {
                            (EventStatus::CompletedWithErrors, Some(e.to_string()))
                        }
                        Err(panic) => (
                            EventStatus::CompletedWithErrors,
                            Some(panic_text(panic)),
                        ),
                    };
                    store.set_status(event.id, status, response).await;
                    host.on_event_complete(&event, status);
                }
            }
        });
    }

    // ── Housekeeping ──────────────────────────────────────────────

    async fn maybe_housekeep(inner: &Arc<Inner>) {
        {
            let mut last = inner.last_cleanup.lock();
            if last.elapsed() < CLEANUP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }

        let removed = inner
            .store
            .cleanup_older_than(inner.cfg.cleanup_hours)
            .await;
        if removed > 0 {
            tracing::debug!(removed, "purged completed pulse events");
        }

        if inner.cfg.session_reset_enabled {
            Self::reset_idle_sessions(inner).await;
        }
    }

    /// Archive and reset sessions idle beyond the configured window.
    async fn reset_idle_sessions(inner: &Arc<Inner>) {
        let cutoff = Utc::now() - chrono::Duration::minutes(inner.cfg.session_reset_mins as i64);
        for key in inner.sessions.keys() {
            let Some(meta) = inner.sessions.get(&key) else {
                continue;
            };
            if meta.updated_at >= cutoff {
                continue;
            }
            let archived = match inner.log.archive_all(&key) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(session_key = %key, error = %e, "idle reset archive failed");
                    continue;
                }
            };
            if archived == 0 {
                continue;
            }
            if let Err(e) = inner.log.append(
                &key,
                "system",
                "[session reset: idle timeout]",
                Some(serde_json::json!({"reset": true})),
            ) {
                tracing::warn!(session_key = %key, error = %e, "idle reset marker failed");
            }
            inner.sessions.update(&key, |m| {
                m.token_estimate = 0;
                m.last_compacted_id = 0;
            });
            tracing::info!(session_key = %key, archived, "idle session reset");
        }
    }
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: unknown".to_string()
    }
}
