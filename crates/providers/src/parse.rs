//! Vendor tool-call parsing.
//!
//! Some models emit tool calls as plain assistant text instead of the
//! native `tool_calls` array. When the native array is empty, the
//! orchestrator runs the text through this fall-through chain:
//!
//! 1. strict JSON blocks containing `name`/`function` keys
//! 2. `<minimax:tool_call>` XML-ish envelopes
//! 3. a last-resort scan for a whitelist of known tools
//!
//! Each stage has explicit size and depth bounds. Input is pre-validated
//! for plausibility indicators and capped at 50 000 bytes.

use serde_json::Value;

use tether_domain::tool::ToolCall;

/// Hard cap on the text we are willing to scan.
const MAX_INPUT_BYTES: usize = 50_000;
/// Maximum JSON nesting depth the block scanner will follow.
const MAX_JSON_DEPTH: usize = 64;
/// Maximum size of a single candidate JSON block.
const MAX_BLOCK_BYTES: usize = 20_000;

/// Tools the last-resort scan recognizes.
const KNOWN_TOOLS: [&str; 9] = [
    "read_file",
    "write_file",
    "execute_command",
    "exec_cmd",
    "cat",
    "read",
    "write",
    "edit",
    "exec",
];

/// Map vendor tool names onto the canonical registry names.
fn canonical_name(name: &str) -> &str {
    match name {
        "read_file" | "cat" => "read",
        "write_file" => "write",
        "execute_command" | "exec_cmd" => "exec",
        other => other,
    }
}

fn next_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Parse vendor-format tool calls out of assistant text.
///
/// Returns an empty vector when the text carries no plausible tool-call
/// payload — plain prose never reaches the expensive stages.
pub fn parse_vendor_tool_calls(text: &str) -> Vec<ToolCall> {
    let text = cap_utf8(text, MAX_INPUT_BYTES);

    if !looks_plausible(text) {
        return Vec::new();
    }

    let calls = parse_json_blocks(text);
    if !calls.is_empty() {
        return calls;
    }

    let calls = parse_minimax_envelopes(text);
    if !calls.is_empty() {
        return calls;
    }

    parse_whitelist_calls(text)
}

/// Truncate to a byte budget without splitting a UTF-8 sequence.
fn cap_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Cheap pre-validation so prose-only replies skip every parse stage.
fn looks_plausible(text: &str) -> bool {
    if text.contains("<minimax:tool_call") {
        return true;
    }
    if text.contains('{') && (text.contains("\"name\"") || text.contains("\"function\"")) {
        return true;
    }
    KNOWN_TOOLS
        .iter()
        .any(|t| text.contains(&format!("{t}(")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 1: strict JSON blocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_json_blocks(text: &str) -> Vec<ToolCall> {
    let mut out = Vec::new();
    for block in extract_balanced_blocks(text) {
        let value: Value = match serde_json::from_str(block) {
            Ok(v) => v,
            Err(_) => continue,
        };
        match value {
            Value::Array(items) => {
                let calls: Vec<ToolCall> =
                    items.iter().filter_map(call_from_object).collect();
                // An array only counts when every element is a call —
                // otherwise it is ordinary JSON data in the reply.
                if !calls.is_empty() && calls.len() == items.len() {
                    out.extend(calls);
                }
            }
            Value::Object(_) => {
                if let Some(call) = call_from_object(&value) {
                    out.push(call);
                }
            }
            _ => {}
        }
    }
    out
}

/// Scan for balanced `{…}` / `[…]` blocks at the top level of the text,
/// respecting string literals and escapes, with depth and size bounds.
fn extract_balanced_blocks(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let open = bytes[i];
        if open != b'{' && open != b'[' {
            i += 1;
            continue;
        }

        let start = i;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        let mut j = i;
        while j < bytes.len() {
            let c = bytes[j];
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == b'\\' {
                    escaped = true;
                } else if c == b'"' {
                    in_string = false;
                }
            } else {
                match c {
                    b'"' => in_string = true,
                    b'{' | b'[' => {
                        depth += 1;
                        if depth > MAX_JSON_DEPTH {
                            break;
                        }
                    }
                    b'}' | b']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            end = Some(j + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if j - start > MAX_BLOCK_BYTES {
                break;
            }
            j += 1;
        }

        match end {
            Some(e) => {
                blocks.push(&text[start..e]);
                i = e;
            }
            None => i += 1,
        }
    }

    blocks
}

/// Interpret one JSON object as a tool call, accepting the common
/// vendor shapes:
/// - `{"name": "read", "arguments": {...}}`
/// - `{"name": "read", "parameters": {...}}`
/// - `{"function": {"name": "read", "arguments": "..."}}`
/// - `{"function": "read", "arguments": {...}}`
fn call_from_object(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;

    let (name, func_args) = if let Some(func) = obj.get("function") {
        match func {
            Value::String(name) => (name.clone(), None),
            Value::Object(f) => (
                f.get("name")?.as_str()?.to_string(),
                f.get("arguments").cloned(),
            ),
            _ => return None,
        }
    } else {
        (obj.get("name")?.as_str()?.to_string(), None)
    };

    if name.is_empty() {
        return None;
    }

    let raw_args = func_args
        .or_else(|| obj.get("arguments").cloned())
        .or_else(|| obj.get("parameters").cloned())
        .unwrap_or(Value::Object(Default::default()));

    let arguments = match raw_args {
        Value::String(s) => {
            serde_json::from_str(&s).unwrap_or(Value::Object(Default::default()))
        }
        Value::Object(_) | Value::Array(_) => raw_args,
        _ => Value::Object(Default::default()),
    };

    let call_id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(next_call_id);

    Some(ToolCall {
        call_id,
        tool_name: canonical_name(&name).to_string(),
        arguments,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 2: minimax XML envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_minimax_envelopes(text: &str) -> Vec<ToolCall> {
    let mut out = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("<minimax:tool_call>") {
        let after = &rest[start + "<minimax:tool_call>".len()..];
        let end = match after.find("</minimax:tool_call>") {
            Some(e) => e,
            None => break,
        };
        let envelope = &after[..end];
        out.extend(parse_invokes(envelope));
        rest = &after[end + "</minimax:tool_call>".len()..];
    }

    out
}

fn parse_invokes(envelope: &str) -> Vec<ToolCall> {
    let mut out = Vec::new();
    let mut rest = envelope;

    while let Some(start) = rest.find("<invoke") {
        let after = &rest[start..];
        let name = match extract_attr(after, "name") {
            Some(n) => n,
            None => break,
        };
        let body_start = match after.find('>') {
            Some(p) => p + 1,
            None => break,
        };
        let body_end = after[body_start..]
            .find("</invoke>")
            .map(|e| body_start + e)
            .unwrap_or(after.len());
        let body = &after[body_start..body_end];

        let mut args = serde_json::Map::new();
        for (key, value) in parse_parameters(body) {
            args.insert(key, value);
        }

        out.push(ToolCall {
            call_id: next_call_id(),
            tool_name: canonical_name(&name).to_string(),
            arguments: Value::Object(args),
        });

        rest = &after[body_end..];
    }

    out
}

fn parse_parameters(body: &str) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("<parameter") {
        let after = &rest[start..];
        let key = match extract_attr(after, "name") {
            Some(k) => k,
            None => break,
        };
        let value_start = match after.find('>') {
            Some(p) => p + 1,
            None => break,
        };
        let value_end = match after[value_start..].find("</parameter>") {
            Some(e) => value_start + e,
            None => break,
        };
        let raw = after[value_start..value_end].trim();
        out.push((key, coerce_scalar(raw)));
        rest = &after[value_end + "</parameter>".len()..];
    }

    out
}

/// Pull `name="…"` out of a tag, tolerating surrounding whitespace.
fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let tag_end = tag.find('>').unwrap_or(tag.len());
    let head = &tag[..tag_end];
    let pat = format!("{attr}=\"");
    let start = head.find(&pat)? + pat.len();
    let end = head[start..].find('"')? + start;
    Some(head[start..end].to_string())
}

/// Parameter values are strings on the wire; numbers and booleans are
/// recognized so `{"count": 3}` round-trips as a number.
fn coerce_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 3: known-tools whitelist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn whitelist_regex() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Longest alternatives first so read_file doesn't match as read.
        regex::Regex::new(
            r"\b(execute_command|read_file|write_file|exec_cmd|read|write|edit|exec|cat)\s*\(([^)]*)\)",
        )
        .expect("whitelist regex is valid")
    })
}

fn parse_whitelist_calls(text: &str) -> Vec<ToolCall> {
    whitelist_regex()
        .captures_iter(text)
        .map(|cap| {
            let name = canonical_name(&cap[1]).to_string();
            let arguments = parse_kv_args(&cap[2]);
            ToolCall {
                call_id: next_call_id(),
                tool_name: name,
                arguments,
            }
        })
        .collect()
}

/// `key=value, key2=value2` → object; a single bare value maps to `input`.
fn parse_kv_args(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Object(Default::default());
    }

    let mut map = serde_json::Map::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        if let Some((k, v)) = piece.split_once('=') {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            map.insert(k.trim().to_string(), coerce_scalar(v));
        } else if map.is_empty() {
            let v = piece.trim_matches('"').trim_matches('\'');
            map.insert("input".to_string(), Value::String(v.to_string()));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prose_yields_nothing() {
        let calls = parse_vendor_tool_calls("Sure, I can help with that. The answer is 42.");
        assert!(calls.is_empty());
    }

    #[test]
    fn json_object_with_name() {
        let calls =
            parse_vendor_tool_calls(r#"I'll read it: {"name": "read", "arguments": {"path": "/tmp/a"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read");
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "/tmp/a"}));
    }

    #[test]
    fn json_array_of_calls() {
        let calls = parse_vendor_tool_calls(
            r#"[{"name": "read", "parameters": {"path": "a"}}, {"name": "write", "parameters": {"path": "b"}}]"#,
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].tool_name, "write");
    }

    #[test]
    fn json_function_wrapper_with_string_args() {
        let calls = parse_vendor_tool_calls(
            r#"{"function": {"name": "execute_command", "arguments": "{\"command\": \"ls\"}"}}"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "exec");
        assert_eq!(calls[0].arguments, serde_json::json!({"command": "ls"}));
    }

    #[test]
    fn aliases_normalize() {
        let calls = parse_vendor_tool_calls(r#"{"name": "read_file", "arguments": {"path": "x"}}"#);
        assert_eq!(calls[0].tool_name, "read");
        let calls = parse_vendor_tool_calls(r#"{"name": "cat", "arguments": {"path": "x"}}"#);
        assert_eq!(calls[0].tool_name, "read");
        let calls = parse_vendor_tool_calls(r#"{"name": "write_file", "arguments": {"path": "x"}}"#);
        assert_eq!(calls[0].tool_name, "write");
    }

    #[test]
    fn minimax_envelope_single_invoke() {
        let text = r#"<minimax:tool_call><invoke name="read_file"><parameter name="path">/tmp/a</parameter></invoke></minimax:tool_call>"#;
        let calls = parse_vendor_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read");
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "/tmp/a"}));
    }

    #[test]
    fn minimax_envelope_with_whitespace() {
        let text = "<minimax:tool_call>\n  <invoke name=\"exec_cmd\">\n    <parameter name=\"command\">uname -r</parameter>\n    <parameter name=\"timeout\">30</parameter>\n  </invoke>\n</minimax:tool_call>";
        let calls = parse_vendor_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "exec");
        assert_eq!(
            calls[0].arguments,
            serde_json::json!({"command": "uname -r", "timeout": 30})
        );
    }

    #[test]
    fn minimax_multiple_invokes() {
        let text = r#"<minimax:tool_call><invoke name="read"><parameter name="path">a</parameter></invoke><invoke name="read"><parameter name="path">b</parameter></invoke></minimax:tool_call>"#;
        let calls = parse_vendor_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], "a");
        assert_eq!(calls[1].arguments["path"], "b");
    }

    #[test]
    fn whitelist_call_with_kv_args() {
        let calls = parse_vendor_tool_calls("Let me check: read(path=/tmp/x.txt)");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read");
        assert_eq!(calls[0].arguments["path"], "/tmp/x.txt");
    }

    #[test]
    fn whitelist_bare_value_maps_to_input() {
        let calls = parse_vendor_tool_calls("exec(\"uname -r\")");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "exec");
        assert_eq!(calls[0].arguments["input"], "uname -r");
    }

    #[test]
    fn data_json_in_reply_is_not_a_call() {
        // An object without name/function keys must not be treated as a call,
        // and a mixed array must not be either.
        let calls = parse_vendor_tool_calls(r#"Here's the data: {"temperature": 20, "name_of_city": "Oslo"}"#);
        assert!(calls.is_empty());
    }

    #[test]
    fn oversized_input_is_capped_not_panicking() {
        let mut text = String::from(r#"{"name": "read", "arguments": {"path": "x"}}"#);
        text.push_str(&"y".repeat(60_000));
        let calls = parse_vendor_tool_calls(&text);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn unbalanced_json_is_skipped() {
        let calls = parse_vendor_tool_calls(r#"{"name": "read", "arguments": {"path": "x""#);
        assert!(calls.is_empty());
    }
}
