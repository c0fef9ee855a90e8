//! Best-effort token estimation for context admission.
//!
//! Prefers a cl100k_base BPE when the vocabulary loads; otherwise falls
//! back to a deterministic character heuristic. Only used to decide what
//! fits in the window, never for billing.

use tiktoken_rs::CoreBPE;

use tether_domain::tool::{ContentPart, Message, MessageContent};

/// Fixed per-message overhead (role + framing) in the fallback path.
const MESSAGE_OVERHEAD: usize = 4;

pub struct TokenEstimator {
    bpe: Option<CoreBPE>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k tokenizer unavailable, using heuristic");
                None
            }
        };
        Self { bpe }
    }

    /// Heuristic-only estimator (deterministic, used in tests).
    pub fn heuristic_only() -> Self {
        Self { bpe: None }
    }

    /// Token count for a raw string. Empty input is 0.
    pub fn estimate_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => heuristic(text),
        }
    }

    /// Token count for one message, including tool payloads and framing.
    pub fn estimate_message(&self, msg: &Message) -> usize {
        let mut total = MESSAGE_OVERHEAD;
        match &msg.content {
            MessageContent::Text(t) => total += self.estimate_text(t),
            MessageContent::Parts(parts) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => total += self.estimate_text(text),
                        ContentPart::ToolUse { name, input, .. } => {
                            total += self.estimate_text(name);
                            total += self.estimate_text(&input.to_string());
                        }
                        ContentPart::ToolResult { content, .. } => {
                            total += self.estimate_text(content);
                        }
                        // Image payloads are estimated by reference, not size.
                        ContentPart::Image { .. } => total += 85,
                    }
                }
            }
        }
        total
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// `ascii/4 + non_ascii*2` — deliberately overcounts wide scripts so
/// admission errs on the safe side.
fn heuristic(text: &str) -> usize {
    let ascii = text.chars().filter(|c| c.is_ascii()).count();
    let non_ascii = text.chars().count() - ascii;
    ascii / 4 + non_ascii * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        let est = TokenEstimator::heuristic_only();
        assert_eq!(est.estimate_text(""), 0);
    }

    #[test]
    fn non_ascii_only_is_positive() {
        let est = TokenEstimator::heuristic_only();
        assert!(est.estimate_text("日本語テキスト") > 0);
    }

    #[test]
    fn heuristic_scales_with_length() {
        let est = TokenEstimator::heuristic_only();
        let short = est.estimate_text("word");
        let long = est.estimate_text(&"word ".repeat(100));
        assert!(long > short);
    }

    #[test]
    fn message_carries_overhead() {
        let est = TokenEstimator::heuristic_only();
        let msg = Message::user("");
        assert_eq!(est.estimate_message(&msg), MESSAGE_OVERHEAD);
    }

    #[test]
    fn tool_parts_are_counted() {
        let est = TokenEstimator::heuristic_only();
        let empty = est.estimate_message(&Message::user(""));
        let with_result = est.estimate_message(&Message::tool_result(
            "tc_1",
            &"data ".repeat(100),
        ));
        assert!(with_result > empty);
    }
}
