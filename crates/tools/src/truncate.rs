//! Tool-result truncation.
//!
//! Oversized tool outputs are capped by bytes and by line count, keeping
//! head and tail around an inline marker. Objects carrying a `content`
//! string field are truncated in place; plain strings are truncated
//! directly. The returned marker carries the sizes the caller folds into
//! the wire envelope as `{truncated: true, original_size, truncated_size}`.

use serde_json::Value;

use tether_domain::config::TruncationConfig;

/// Sizes recorded when a value was cut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationMarker {
    pub original_size: usize,
    pub truncated_size: usize,
}

/// Apply the byte and line caps to a tool result value.
pub fn truncate_value(value: Value, cfg: &TruncationConfig) -> (Value, Option<TruncationMarker>) {
    match value {
        Value::String(s) => {
            let original = s.len();
            match truncate_text(&s, cfg) {
                Some(cut) => {
                    let marker = TruncationMarker {
                        original_size: original,
                        truncated_size: cut.len(),
                    };
                    (Value::String(cut), Some(marker))
                }
                None => (Value::String(s), None),
            }
        }
        Value::Object(mut map) => {
            let content = map.get("content").and_then(|v| v.as_str()).map(String::from);
            if let Some(text) = content {
                let original = text.len();
                if let Some(cut) = truncate_text(&text, cfg) {
                    let marker = TruncationMarker {
                        original_size: original,
                        truncated_size: cut.len(),
                    };
                    map.insert("content".into(), Value::String(cut));
                    return (Value::Object(map), Some(marker));
                }
            }
            (Value::Object(map), None)
        }
        other => (other, None),
    }
}

/// Returns the truncated text, or `None` when it already fits.
fn truncate_text(text: &str, cfg: &TruncationConfig) -> Option<String> {
    let over_bytes = text.len() > cfg.max_bytes;
    let line_count = text.lines().count();
    let over_lines = line_count > cfg.max_lines;

    if !over_bytes && !over_lines {
        return None;
    }

    let mut out = if over_lines {
        head_tail_lines(text, cfg.max_lines, line_count)
    } else {
        text.to_string()
    };

    if out.len() > cfg.max_bytes {
        out = head_tail_bytes(&out, cfg.max_bytes);
    }

    Some(out)
}

/// Keep the first and last halves of the line budget around a marker.
fn head_tail_lines(text: &str, max_lines: usize, total: usize) -> String {
    let keep_head = max_lines / 2;
    let keep_tail = max_lines - keep_head;
    let lines: Vec<&str> = text.lines().collect();

    let mut out = lines[..keep_head].join("\n");
    out.push_str(&format!(
        "\n…[{} lines truncated]…\n",
        total - keep_head - keep_tail
    ));
    out.push_str(&lines[total - keep_tail..].join("\n"));
    out
}

/// Keep the first and last halves of the byte budget around a marker.
fn head_tail_bytes(text: &str, max_bytes: usize) -> String {
    let keep_head = max_bytes / 2;
    let keep_tail = max_bytes - keep_head;

    let head_end = floor_char_boundary(text, keep_head);
    let tail_start = ceil_char_boundary(text, text.len().saturating_sub(keep_tail));

    format!(
        "{}…[{} bytes truncated]…{}",
        &text[..head_end],
        tail_start - head_end,
        &text[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
