use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification used by the recall reranker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Decision,
    Preference,
    Fact,
    Entity,
    #[default]
    Other,
}

impl MemoryCategory {
    /// Rerank boost applied on top of the raw similarity score.
    pub fn boost(&self) -> f64 {
        match self {
            MemoryCategory::Decision => 0.2,
            MemoryCategory::Preference => 0.15,
            MemoryCategory::Fact => 0.1,
            MemoryCategory::Entity => 0.05,
            MemoryCategory::Other => 0.0,
        }
    }
}

/// A stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub category: MemoryCategory,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One search result: the entry plus its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    pub score: f64,
}
