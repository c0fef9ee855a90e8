//! Append-only JSONL message logs.
//!
//! Each session gets a `<key>.jsonl` file under the log directory. Every
//! message is appended as a single JSON line carrying a monotonically
//! assigned `id`; compaction moves old lines into `<key>.archive.jsonl`
//! instead of deleting them.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};

/// A single stored message line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Monotonic per-session id, assigned by the log.
    pub id: u64,
    pub timestamp: String,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StoredMessage {
    /// Whether this line is a compaction summary marker.
    pub fn is_summary(&self) -> bool {
        self.meta_flag("summary")
    }

    /// Whether this line is a session reset marker.
    pub fn is_reset_marker(&self) -> bool {
        self.meta_flag("reset")
    }

    fn meta_flag(&self, key: &str) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Counts reported for a session's archive file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveStats {
    pub archived_messages: usize,
    pub archive_bytes: u64,
}

/// Append-only message log with per-session monotonic ids.
pub struct MessageLog {
    base_dir: PathBuf,
    /// Highest id handed out per session key.
    next_ids: Mutex<HashMap<String, u64>>,
}

impl MessageLog {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            next_ids: Mutex::new(HashMap::new()),
        })
    }

    fn log_path(&self, session_key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", sanitize_key(session_key)))
    }

    fn archive_path(&self, session_key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.archive.jsonl", sanitize_key(session_key)))
    }

    /// Allocate the next message id for a session. The counter is seeded
    /// from the existing file the first time a session is touched.
    fn alloc_id(&self, session_key: &str) -> u64 {
        let mut ids = self.next_ids.lock();
        let next = match ids.get(session_key) {
            Some(n) => n + 1,
            None => self.max_stored_id(session_key) + 1,
        };
        ids.insert(session_key.to_owned(), next);
        next
    }

    fn max_stored_id(&self, session_key: &str) -> u64 {
        self.read(session_key)
            .unwrap_or_default()
            .last()
            .map(|m| m.id)
            .unwrap_or(0)
    }

    /// Append one message and return its assigned id.
    pub fn append(
        &self,
        session_key: &str,
        role: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<u64> {
        let id = self.alloc_id(session_key);
        let line = StoredMessage {
            id,
            timestamp: Utc::now().to_rfc3339(),
            role: role.to_owned(),
            content: content.to_owned(),
            metadata,
        };
        append_lines(&self.log_path(session_key), std::slice::from_ref(&line))?;
        Ok(id)
    }

    /// Read back all messages for a session.
    pub fn read(&self, session_key: &str) -> Result<Vec<StoredMessage>> {
        read_lines(&self.log_path(session_key), session_key)
    }

    /// Read the last `n` messages for a session.
    pub fn last_n(&self, session_key: &str, n: usize) -> Result<Vec<StoredMessage>> {
        let mut all = self.read(session_key)?;
        if all.len() > n {
            all.drain(..all.len() - n);
        }
        Ok(all)
    }

    /// Move every message with `id <= upto_id` into the archive file and
    /// rewrite the live log with the remainder. Returns how many lines
    /// were archived.
    pub fn archive_through(&self, session_key: &str, upto_id: u64) -> Result<usize> {
        let all = self.read(session_key)?;
        let (old, kept): (Vec<_>, Vec<_>) = all.into_iter().partition(|m| m.id <= upto_id);
        if old.is_empty() {
            return Ok(0);
        }
        append_lines(&self.archive_path(session_key), &old)?;
        rewrite_lines(&self.log_path(session_key), &kept)?;
        Ok(old.len())
    }

    /// Replace the live log wholesale (used by compaction to re-insert
    /// the kept tail behind a summary line). Ids are preserved as given.
    pub fn replace(&self, session_key: &str, messages: &[StoredMessage]) -> Result<()> {
        rewrite_lines(&self.log_path(session_key), messages)?;
        // Keep the id counter ahead of anything we just wrote back.
        let max = messages.iter().map(|m| m.id).max().unwrap_or(0);
        let mut ids = self.next_ids.lock();
        let entry = ids.entry(session_key.to_owned()).or_insert(0);
        if *entry < max {
            *entry = max;
        }
        Ok(())
    }

    /// Archive everything and truncate the live log (session reset).
    pub fn archive_all(&self, session_key: &str) -> Result<usize> {
        self.archive_through(session_key, u64::MAX)
    }

    /// Stats for a session's archive file.
    pub fn archive_stats(&self, session_key: &str) -> ArchiveStats {
        let path = self.archive_path(session_key);
        let archived_messages = read_lines(&path, session_key)
            .map(|v| v.len())
            .unwrap_or(0);
        let archive_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        ArchiveStats {
            archived_messages,
            archive_bytes,
        }
    }

    /// Read back archived messages (for `/debug archive`).
    pub fn read_archive(&self, session_key: &str) -> Result<Vec<StoredMessage>> {
        read_lines(&self.archive_path(session_key), session_key)
    }

    /// Build a stored line without appending (callers pick the id).
    pub fn line(id: u64, role: &str, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            timestamp: Utc::now().to_rfc3339(),
            role: role.to_owned(),
            content: content.to_owned(),
            metadata: None,
        }
    }
}

fn append_lines(path: &Path, lines: &[StoredMessage]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    for line in lines {
        buf.push_str(&serde_json::to_string(line).map_err(Error::Json)?);
        buf.push('\n');
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(buf.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

fn rewrite_lines(path: &Path, lines: &[StoredMessage]) -> Result<()> {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(&serde_json::to_string(line).map_err(Error::Json)?);
        buf.push('\n');
    }
    std::fs::write(path, buf).map_err(Error::Io)?;
    Ok(())
}

fn read_lines(path: &Path, session_key: &str) -> Result<Vec<StoredMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut lines = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredMessage>(line) {
            Ok(m) => lines.push(m),
            Err(e) => {
                tracing::warn!(
                    session_key = session_key,
                    error = %e,
                    "skipping malformed message line"
                );
            }
        }
    }
    Ok(lines)
}

/// Session keys may carry `live:`-style prefixes; keep filenames flat.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
