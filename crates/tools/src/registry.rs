//! Tool registry — the dispatch surface the orchestrator calls through.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tether_domain::tool::{ToolDefinition, ToolOutcome};

/// A callable tool. Implementations normalize their own failures into
/// [`ToolOutcome::Err`]; panics are caught one level up by the
/// orchestrator's task isolation.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome;
}

/// Registry mapping tool names to implementations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, replacing previous handler");
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Invoke a tool by name. Unknown names come back as tool errors,
    /// not transport failures.
    pub async fn call_tool(&self, name: &str, args: &serde_json::Value) -> ToolOutcome {
        let tool = self.tools.read().get(name).cloned();
        match tool {
            Some(tool) => tool.call(args).await,
            None => ToolOutcome::err(name, format!("unknown tool '{name}'")),
        }
    }

    /// Definitions for every registered tool, sorted by name so the
    /// model-facing list is stable across runs.
    pub fn specs(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
