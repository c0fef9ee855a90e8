//! Durable session state: the append-only message log and the
//! session metadata store. Both are owned by the storage layer; the
//! agent treats writes as best-effort (logged on failure, never
//! failing a user turn).

pub mod log;
pub mod store;

pub use log::{ArchiveStats, MessageLog, StoredMessage};
pub use store::{ProviderType, SessionMeta, SessionStore};
