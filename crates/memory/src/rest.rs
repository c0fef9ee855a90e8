//! REST client for the vector memory service.

use async_trait::async_trait;

use tether_domain::config::MemoryConfig;
use tether_domain::error::{Error, Result};

use crate::provider::VectorMemory;
use crate::types::{MemoryCategory, SearchHit};

pub struct RestMemory {
    base_url: String,
    client: reqwest::Client,
}

impl RestMemory {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Memory(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Memory(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Memory(format!(
                "{path}: HTTP {} - {text}",
                status.as_u16()
            )));
        }
        resp.json().await.map_err(|e| Error::Memory(e.to_string()))
    }
}

#[async_trait]
impl VectorMemory for RestMemory {
    async fn search(&self, query: &str, limit: usize, min_score: f64) -> Result<Vec<SearchHit>> {
        let body = serde_json::json!({
            "query": query,
            "limit": limit,
            "min_score": min_score,
        });
        let resp = self.post_json("/search", &body).await?;
        let hits = resp
            .get("hits")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        serde_json::from_value(hits).map_err(|e| Error::Memory(format!("bad search payload: {e}")))
    }

    async fn store_with_source(
        &self,
        content: &str,
        category: MemoryCategory,
        importance: f64,
        source: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "content": content,
            "category": category,
            "importance": importance,
            "source": source,
        });
        self.post_json("/memories", &body).await?;
        Ok(())
    }
}
