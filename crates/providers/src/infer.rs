//! Provider-kind inference and static context-window fallbacks.
//!
//! The configured base URL decides which provider a deployment talks to;
//! the kind feeds call pacing and the static context-window table used
//! when the model-info endpoint is unavailable.

/// Final context-window fallback when neither the model-info endpoint
/// nor the static table knows the model.
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    Google,
    Minimax,
    Ollama,
    OpenRouter,
    Moonshot,
    Zhipu,
    Qianfan,
    Bedrock,
    Vercel,
    ZAi,
    OpenAi,
}

impl ProviderKind {
    /// Infer the provider from a base URL by substring match.
    /// Anything unrecognized is treated as OpenAI-compatible.
    pub fn from_base_url(base_url: &str) -> Self {
        let url = base_url.to_ascii_lowercase();
        if url.contains("anthropic") {
            ProviderKind::Anthropic
        } else if url.contains("generativelanguage") || url.contains("google") {
            ProviderKind::Google
        } else if url.contains("minimax") {
            ProviderKind::Minimax
        } else if url.contains("ollama") {
            ProviderKind::Ollama
        } else if url.contains("openrouter") {
            ProviderKind::OpenRouter
        } else if url.contains("moonshot") {
            ProviderKind::Moonshot
        } else if url.contains("zhipu") || url.contains("glm") {
            ProviderKind::Zhipu
        } else if url.contains("qianfan") {
            ProviderKind::Qianfan
        } else if url.contains("bedrock") {
            ProviderKind::Bedrock
        } else if url.contains("vercel") {
            ProviderKind::Vercel
        } else if url.contains("z.ai") {
            ProviderKind::ZAi
        } else {
            ProviderKind::OpenAi
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Minimax => "minimax",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Moonshot => "moonshot",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::Qianfan => "qianfan",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Vercel => "vercel",
            ProviderKind::ZAi => "z.ai",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Static per-provider context window, used when the model-info
    /// endpoint does not answer.
    pub fn static_context_window(&self) -> usize {
        match self {
            ProviderKind::Anthropic => 200_000,
            ProviderKind::Google => 1_048_576,
            ProviderKind::Minimax => 245_760,
            ProviderKind::Ollama => DEFAULT_CONTEXT_WINDOW,
            ProviderKind::OpenRouter => 128_000,
            ProviderKind::Moonshot => 131_072,
            ProviderKind::Zhipu => 131_072,
            ProviderKind::Qianfan => 131_072,
            ProviderKind::Bedrock => 200_000,
            ProviderKind::Vercel => 128_000,
            ProviderKind::ZAi => 131_072,
            ProviderKind::OpenAi => 128_000,
        }
    }

    /// Minimum spacing between successive calls, to avoid sustained 429s.
    /// Only Anthropic currently needs pacing.
    pub fn min_call_spacing(&self) -> Option<std::time::Duration> {
        match self {
            ProviderKind::Anthropic => Some(std::time::Duration::from_millis(500)),
            _ => None,
        }
    }
}
