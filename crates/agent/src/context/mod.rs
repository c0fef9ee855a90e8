//! Context-window management: token admission, pruning, and the
//! compaction hand-off.
//!
//! [`handle_overflow`] is the single entry point the router calls before
//! dispatching to the model. It works on the structured prompt parts
//! (system prefix, stored history, trailing new messages) so a
//! mid-flight compaction can swap the history out from under the rest.

pub mod estimate;
pub mod prune;

use std::time::Duration;

use tether_domain::tool::Message;
use tether_providers::LlmProvider;

use crate::state::AgentCore;

/// How long a turn waits for an enqueued compaction before proceeding
/// with the best-effort list.
const COMPACTION_WAIT: Duration = Duration::from_secs(2);

/// Shrink the prompt until `prefix + history + tail` fits the window
/// minus the configured reserves.
///
/// Escalation order: untouched → prune tool results → hard-clear tool
/// results → compaction (bounded wait, then reload from storage). When
/// even compaction cannot get under the threshold the best-effort list
/// is returned and the provider's own truncation is the last resort.
pub async fn handle_overflow(
    core: &AgentCore,
    session_key: &str,
    prefix: Vec<Message>,
    mut history: Vec<Message>,
    tail: Vec<Message>,
) -> Vec<Message> {
    let window = match core.config.context.context_tokens {
        Some(n) => n,
        None => core.provider.context_window().await,
    };
    let reserve = core.config.context.reserve_tokens + core.config.context.soft_tokens;
    let threshold = window.saturating_sub(reserve);

    let assemble = |history: &[Message]| -> Vec<Message> {
        prefix
            .iter()
            .chain(history.iter())
            .chain(tail.iter())
            .cloned()
            .collect()
    };

    let mut messages = assemble(&history);
    let estimate = core.estimator.estimate_messages(&messages);
    if estimate <= threshold {
        return messages;
    }

    tracing::debug!(
        session_key,
        estimate,
        threshold,
        "context over threshold, pruning tool results"
    );

    // Stage 1: soft-trim oversized tool results.
    history = prune::prune_messages(&history, &core.config.pruning);
    messages = assemble(&history);
    if core.estimator.estimate_messages(&messages) <= threshold {
        return messages;
    }

    // Stage 2: fully clear prunable tool results.
    history = prune::hard_clear_messages(&history, &core.config.pruning);
    messages = assemble(&history);
    if core.estimator.estimate_messages(&messages) <= threshold {
        return messages;
    }

    // Stage 3: compaction. Enqueue and wait briefly; on completion the
    // history is reloaded from storage (summary + kept tail).
    let rx = core
        .compactor
        .spawn(session_key, core.estimator.clone(), None);
    match tokio::time::timeout(COMPACTION_WAIT, rx).await {
        Ok(Ok(true)) => {
            let reloaded = crate::router::load_history(core, session_key);
            messages = assemble(&reloaded);
        }
        Ok(_) => {
            tracing::debug!(session_key, "compaction skipped, sending best-effort context");
        }
        Err(_) => {
            tracing::warn!(
                session_key,
                "compaction still running after wait, sending best-effort context"
            );
        }
    }

    let final_estimate = core.estimator.estimate_messages(&messages);
    if final_estimate > threshold {
        // Exhaustion: rely on the provider's truncation.
        tracing::warn!(
            session_key,
            estimate = final_estimate,
            threshold,
            "context still over threshold after compaction"
        );
    }
    messages
}
