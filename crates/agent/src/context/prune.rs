//! Context pruning — trim oversized tool results before sending to the
//! LLM.
//!
//! Rules:
//! - only `Tool`-role messages are touched, walked oldest-first
//! - tool results for the last N assistant messages are protected
//! - tool results containing images are never pruned
//! - soft-trim keeps head + tail around a `…[N bytes truncated]…` marker
//! - hard-clear replaces the whole result with a placeholder when enabled

use tether_domain::config::{PruningConfig, PruningMode};
use tether_domain::tool::{ContentPart, Message, MessageContent, Role};

/// Prune a message list, returning a new (possibly smaller) copy.
pub fn prune_messages(messages: &[Message], config: &PruningConfig) -> Vec<Message> {
    if config.mode == PruningMode::Off {
        return messages.to_vec();
    }

    let cutoff = find_protection_cutoff(messages, config.keep_last_assistants);

    let mut result = Vec::with_capacity(messages.len());
    for (i, msg) in messages.iter().enumerate() {
        if msg.role != Role::Tool || i >= cutoff {
            result.push(msg.clone());
            continue;
        }
        if msg.content.contains_image() {
            result.push(msg.clone());
            continue;
        }
        result.push(Message {
            role: msg.role,
            content: prune_tool_content(&msg.content, config),
        });
    }
    result
}

/// Find the message index before which tool results are eligible for
/// pruning. Everything at index < cutoff can be pruned; >= cutoff is
/// protected.
fn find_protection_cutoff(messages: &[Message], keep_last_assistants: usize) -> usize {
    if keep_last_assistants == 0 {
        return messages.len();
    }

    let mut assistant_count = 0;
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.role == Role::Assistant {
            assistant_count += 1;
            if assistant_count >= keep_last_assistants {
                return i;
            }
        }
    }

    // Not enough assistant messages to protect — don't prune anything.
    messages.len()
}

fn prune_tool_content(content: &MessageContent, config: &PruningConfig) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(prune_text(text, config)),
        MessageContent::Parts(parts) => {
            let pruned: Vec<ContentPart> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => ContentPart::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: prune_text(content, config),
                        is_error: *is_error,
                    },
                    other => other.clone(),
                })
                .collect();
            MessageContent::Parts(pruned)
        }
    }
}

fn prune_text(text: &str, config: &PruningConfig) -> String {
    let len = text.len();
    if len < config.min_prunable_tool_chars {
        return text.to_owned();
    }

    let head = config.soft_trim.head_chars.min(len);
    let tail = config.soft_trim.tail_chars.min(len.saturating_sub(head));

    if head + tail >= len {
        return text.to_owned();
    }

    // Hard-clear wins for results where even the trimmed form is mostly
    // marker (nothing meaningful would survive the soft trim).
    if config.hard_clear.enabled && head == 0 && tail == 0 {
        return format!("{} ({} bytes)", config.hard_clear.placeholder, len);
    }

    let head_end = floor_char_boundary(text, head);
    let tail_start = ceil_char_boundary(text, len - tail);
    format!(
        "{}…[{} bytes truncated]…{}",
        &text[..head_end],
        tail_start - head_end,
        &text[tail_start..]
    )
}

/// Second pass for lists that are still over budget after soft-trim:
/// fully clear every prunable tool result to the placeholder.
pub fn hard_clear_messages(messages: &[Message], config: &PruningConfig) -> Vec<Message> {
    if config.mode == PruningMode::Off || !config.hard_clear.enabled {
        return messages.to_vec();
    }

    let cutoff = find_protection_cutoff(messages, config.keep_last_assistants);

    let mut result = Vec::with_capacity(messages.len());
    for (i, msg) in messages.iter().enumerate() {
        if msg.role != Role::Tool || i >= cutoff || msg.content.contains_image() {
            result.push(msg.clone());
            continue;
        }
        let content = match &msg.content {
            MessageContent::Text(t) => {
                MessageContent::Text(clear_text(t, config))
            }
            MessageContent::Parts(parts) => MessageContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => ContentPart::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: clear_text(content, config),
                            is_error: *is_error,
                        },
                        other => other.clone(),
                    })
                    .collect(),
            ),
        };
        result.push(Message { role: msg.role, content });
    }
    result
}

fn clear_text(text: &str, config: &PruningConfig) -> String {
    if text.len() < config.min_prunable_tool_chars {
        return text.to_owned();
    }
    format!("{} ({} bytes)", config.hard_clear.placeholder, text.len())
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
