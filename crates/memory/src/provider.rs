//! The `VectorMemory` trait defines the interface for all memory
//! back-ends (REST, in-process, mock/test).

use async_trait::async_trait;

use tether_domain::error::Result;

use crate::types::{MemoryCategory, SearchHit};

/// Abstraction over the vector memory service.
#[async_trait]
pub trait VectorMemory: Send + Sync {
    /// Semantic search, returning up to `limit` hits above `min_score`.
    async fn search(&self, query: &str, limit: usize, min_score: f64) -> Result<Vec<SearchHit>>;

    /// Store a new memory with provenance.
    async fn store_with_source(
        &self,
        content: &str,
        category: MemoryCategory,
        importance: f64,
        source: &str,
    ) -> Result<()>;
}
