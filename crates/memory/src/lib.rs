//! Vector-addressed long-term memory: the provider trait, the REST
//! client, and the recall reranker used for system-prompt injection.

pub mod provider;
pub mod recall;
pub mod rest;
pub mod types;

pub use provider::VectorMemory;
pub use recall::{CaptureThrottle, Recaller};
pub use rest::RestMemory;
pub use types::{MemoryCategory, MemoryEntry, SearchHit};
