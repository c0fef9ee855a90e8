//! Session metadata store.
//!
//! Persists per-session metadata in `sessions.json` under the state path.
//! Sessions are created on first use and never auto-deleted; resetting a
//! session archives its messages and bumps the metadata in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the session talks to the model by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Http,
    Live,
}

/// A single session tracked by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Best-effort token estimate of the stored history.
    #[serde(default)]
    pub token_estimate: u64,
    #[serde(default)]
    pub compaction_count: u32,
    #[serde(default)]
    pub last_summary: Option<String>,
    /// Highest message id already moved to the archive.
    #[serde(default)]
    pub last_compacted_id: u64,
    #[serde(default)]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub last_realtime_activity: Option<DateTime<Utc>>,
}

impl SessionMeta {
    fn new(session_key: &str) -> Self {
        let now = Utc::now();
        Self {
            session_key: session_key.to_owned(),
            created_at: now,
            updated_at: now,
            token_estimate: 0,
            compaction_count: 0,
            last_summary: None,
            last_compacted_id: 0,
            provider_type: ProviderType::Http,
            last_realtime_activity: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed session metadata store.
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionMeta>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
        })
    }

    /// Look up a session by its key.
    pub fn get(&self, session_key: &str) -> Option<SessionMeta> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or create a session. Returns `(meta, is_new)`.
    pub fn resolve_or_create(&self, session_key: &str) -> (SessionMeta, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(meta) = sessions.get(session_key) {
                return (meta.clone(), false);
            }
        }

        let meta = SessionMeta::new(session_key);
        self.sessions
            .write()
            .insert(session_key.to_owned(), meta.clone());
        self.persist();
        (meta, true)
    }

    /// Apply a mutation to a session's metadata and persist.
    /// Creates the session if it does not exist yet.
    pub fn update<F>(&self, session_key: &str, f: F)
    where
        F: FnOnce(&mut SessionMeta),
    {
        {
            let mut sessions = self.sessions.write();
            let meta = sessions
                .entry(session_key.to_owned())
                .or_insert_with(|| SessionMeta::new(session_key));
            f(meta);
            meta.updated_at = Utc::now();
        }
        self.persist();
    }

    /// All tracked session keys.
    pub fn keys(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Sessions whose provider type is `live` (for realtime GC policy).
    pub fn live_sessions(&self) -> Vec<SessionMeta> {
        self.sessions
            .read()
            .values()
            .filter(|m| m.provider_type == ProviderType::Live)
            .cloned()
            .collect()
    }

    /// Best-effort write of the whole map. Failures are logged, never
    /// surfaced — metadata loss must not fail a user turn.
    fn persist(&self) {
        let snapshot = self.sessions.read().clone();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.sessions_path, json) {
                    tracing::warn!(error = %e, "failed to persist session store");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize session store"),
        }
    }
}
