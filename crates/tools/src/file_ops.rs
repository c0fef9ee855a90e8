//! File tools: read, write, edit.

use tether_domain::tool::ToolOutcome;

use crate::registry::Tool;

fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ReadTool;

#[async_trait::async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }
    fn description(&self) -> &str {
        "Read a file and return its content."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        let path = match required_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err("read", e),
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => ToolOutcome::ok(serde_json::json!({
                "path": path,
                "content": content,
            })),
            Err(e) => ToolOutcome::err("read", format!("{path}: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct WriteTool;

#[async_trait::async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }
    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to write" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        let path = match required_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err("write", e),
        };
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutcome::err("write", format!("{}: {e}", parent.display()));
                }
            }
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => ToolOutcome::ok(serde_json::json!({
                "path": path,
                "bytes_written": content.len(),
            })),
            Err(e) => ToolOutcome::err("write", format!("{path}: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct EditTool;

#[async_trait::async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }
    fn description(&self) -> &str {
        "Replace text in a file. 'find' must occur at least once."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to edit" },
                "find": { "type": "string", "description": "Text to find" },
                "replace": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "find", "replace"]
        })
    }

    async fn call(&self, args: &serde_json::Value) -> ToolOutcome {
        let path = match required_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err("edit", e),
        };
        let find = match required_str(args, "find") {
            Ok(f) => f,
            Err(e) => return ToolOutcome::err("edit", e),
        };
        let replace = args.get("replace").and_then(|v| v.as_str()).unwrap_or("");

        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err("edit", format!("{path}: {e}")),
        };

        let occurrences = content.matches(find).count();
        if occurrences == 0 {
            return ToolOutcome::err("edit", format!("'{find}' not found in {path}"));
        }

        let updated = content.replace(find, replace);
        match tokio::fs::write(path, &updated).await {
            Ok(()) => ToolOutcome::ok(serde_json::json!({
                "path": path,
                "replacements": occurrences,
            })),
            Err(e) => ToolOutcome::err("edit", format!("{path}: {e}")),
        }
    }
}
