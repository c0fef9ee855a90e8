//! Hook registry — maps event types to named handlers.
//!
//! Registration indexes a hook under each of its event types and under
//! each type's parent (split on `:`), so a `command:new` hook also fires
//! for bare `command` dispatches. Dispatch is fire-and-forget: every
//! enabled hook runs on its own task with panic isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;

use tether_domain::error::Result;

use super::store::Priority;

/// The payload handed to hook handlers.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub event_type: String,
    pub action: String,
    pub session_key: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form context bag.
    pub context: serde_json::Value,
}

#[async_trait::async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, event: HookEvent) -> Result<()>;
}

/// Environment a hook needs before it may run.
#[derive(Debug, Clone, Default)]
pub struct HookRequirements {
    /// Binaries that must be resolvable on PATH.
    pub bins: Vec<String>,
    /// Environment variables that must be set.
    pub env: Vec<String>,
    /// Required OS (`linux`, `macos`, …); `None` = any.
    pub os: Option<String>,
}

impl HookRequirements {
    /// Check the requirements against the running host.
    pub fn satisfied(&self) -> bool {
        if let Some(ref os) = self.os {
            if os != std::env::consts::OS {
                return false;
            }
        }
        if self.env.iter().any(|v| std::env::var(v).is_err()) {
            return false;
        }
        self.bins.iter().all(|bin| bin_on_path(bin))
    }
}

fn bin_on_path(bin: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
}

pub struct PulseHook {
    pub name: String,
    pub emoji: String,
    pub description: String,
    /// Event types this hook subscribes to.
    pub events: Vec<String>,
    pub priority: Priority,
    pub handler: Arc<dyn HookHandler>,
    pub requirements: HookRequirements,
}

struct RegisteredHook {
    hook: PulseHook,
    enabled: AtomicBool,
    /// Registration order, used to keep dispatch deterministic.
    seq: usize,
}

/// Registry state: hooks by name plus an event-type index.
#[derive(Default)]
struct RegistryState {
    hooks: HashMap<String, Arc<RegisteredHook>>,
    by_event: HashMap<String, Vec<String>>,
    next_seq: usize,
}

pub struct HookRegistry {
    state: RwLock<RegistryState>,
    globally_enabled: AtomicBool,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            globally_enabled: AtomicBool::new(true),
        }
    }

    /// Register a hook. Names are unique: re-registering a name replaces
    /// the previous hook. Hooks with unsatisfied requirements register
    /// disabled.
    pub fn register(&self, hook: PulseHook) {
        let enabled = hook.requirements.satisfied();
        if !enabled {
            tracing::warn!(hook = %hook.name, "hook requirements unmet, registering disabled");
        }

        let mut state = self.state.write();
        let name = hook.name.clone();

        // Drop a previous registration's index entries.
        if state.hooks.remove(&name).is_some() {
            for names in state.by_event.values_mut() {
                names.retain(|n| n != &name);
            }
        }

        let mut event_keys: Vec<String> = Vec::new();
        for event in &hook.events {
            event_keys.push(event.clone());
            // `command:new` also fires on `command`.
            if let Some((parent, _)) = event.split_once(':') {
                event_keys.push(parent.to_string());
            }
        }
        event_keys.sort();
        event_keys.dedup();

        let seq = state.next_seq;
        state.next_seq += 1;
        let registered = Arc::new(RegisteredHook {
            hook,
            enabled: AtomicBool::new(enabled),
            seq,
        });

        for key in event_keys {
            state.by_event.entry(key).or_default().push(name.clone());
        }
        state.hooks.insert(name, registered);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.hooks.remove(name).is_some();
        if removed {
            for names in state.by_event.values_mut() {
                names.retain(|n| n != name);
            }
        }
        removed
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let state = self.state.read();
        match state.hooks.get(name) {
            Some(h) => {
                h.enabled.store(enabled, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn set_globally_enabled(&self, enabled: bool) {
        self.globally_enabled.store(enabled, Ordering::Release);
    }

    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().hooks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Hooks that would fire for an event type, in dispatch order
    /// (priority, then registration order).
    fn matching(&self, event_type: &str) -> Vec<Arc<RegisteredHook>> {
        let state = self.state.read();
        let mut hooks: Vec<Arc<RegisteredHook>> = state
            .by_event
            .get(event_type)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| state.hooks.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default();
        hooks.sort_by_key(|h| (h.hook.priority, h.seq));
        hooks
    }

    /// Fire-and-forget dispatch with per-hook panic isolation. A no-op
    /// when the registry is globally disabled.
    pub fn dispatch(&self, event: HookEvent) {
        if !self.globally_enabled.load(Ordering::Acquire) {
            return;
        }

        for registered in self.matching(&event.event_type) {
            if !registered.enabled.load(Ordering::Acquire) {
                continue;
            }
            let handler = registered.hook.handler.clone();
            let name = registered.hook.name.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let run = std::panic::AssertUnwindSafe(handler.handle(event)).catch_unwind();
                match run.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(hook = %name, error = %e, "hook handler failed");
                    }
                    Err(_) => {
                        tracing::error!(hook = %name, "hook handler panicked");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl HookHandler for CountingHandler {
        async fn handle(&self, _event: HookEvent) -> Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl HookHandler for PanickingHandler {
        async fn handle(&self, _event: HookEvent) -> Result<()> {
            panic!("boom");
        }
    }

    fn hook(name: &str, events: &[&str], handler: Arc<dyn HookHandler>) -> PulseHook {
        PulseHook {
            name: name.into(),
            emoji: "⚙".into(),
            description: String::new(),
            events: events.iter().map(|s| s.to_string()).collect(),
            priority: Priority::Normal,
            handler,
            requirements: HookRequirements::default(),
        }
    }

    fn event(event_type: &str) -> HookEvent {
        HookEvent {
            event_type: event_type.into(),
            action: "test".into(),
            session_key: "s1".into(),
            timestamp: Utc::now(),
            context: serde_json::Value::Null,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn dispatch_runs_matching_hooks() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "counter",
            &["command:new"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));

        reg.dispatch(event("command:new"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parent_event_type_also_fires() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "counter",
            &["command:new"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));

        reg.dispatch(event("command"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrelated_event_does_not_fire() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "counter",
            &["command:new"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));

        reg.dispatch(event("session:reset"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_hook_is_skipped() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "counter",
            &["tick"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));
        assert!(reg.set_enabled("counter", false));

        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn global_disable_is_a_noop_dispatch() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "counter",
            &["tick"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));
        reg.set_globally_enabled(false);

        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_hook_does_not_poison_others() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        reg.register(hook("bad", &["tick"], Arc::new(PanickingHandler)));
        reg.register(hook(
            "good",
            &["tick"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        ));

        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reregistering_replaces_previous() {
        let reg = HookRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        reg.register(hook(
            "h",
            &["tick"],
            Arc::new(CountingHandler { hits: first.clone() }),
        ));
        reg.register(hook(
            "h",
            &["tick"],
            Arc::new(CountingHandler { hits: second.clone() }),
        ));

        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmet_env_requirement_registers_disabled() {
        let reg = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut h = hook(
            "needs-env",
            &["tick"],
            Arc::new(CountingHandler { hits: hits.clone() }),
        );
        h.requirements.env = vec!["TETHER_TEST_VAR_THAT_DOES_NOT_EXIST".into()];
        reg.register(h);

        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Explicitly enabling overrides the requirement gate.
        reg.set_enabled("needs-env", true);
        reg.dispatch(event("tick"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
