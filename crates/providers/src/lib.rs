//! Provider dispatch for the tether runtime.
//!
//! The [`HttpProvider`] adapter speaks the OpenAI-style chat completions
//! contract (which Anthropic-, Google-, Minimax-, Ollama-compatible
//! gateways also accept) and layers on the dispatch policies the core
//! depends on: provider-kind inference from the base URL, context-window
//! resolution, retry with backoff, call pacing, and depth-scaled
//! timeouts. Vendor-specific tool-call envelopes embedded in assistant
//! text are decoded by [`parse`].

pub mod http;
pub mod infer;
pub mod parse;
pub mod sse;
pub mod traits;

pub use http::HttpProvider;
pub use infer::{ProviderKind, DEFAULT_CONTEXT_WINDOW};
pub use traits::{
    ChatRequest, ChatResponse, LlmProvider, RealtimeFactory, RealtimeProvider, RealtimeSettings,
};
