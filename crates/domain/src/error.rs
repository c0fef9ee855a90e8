/// Shared error type used across all tether crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("memory: {0}")]
    Memory(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("policy: {0}")]
    Policy(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is worth retrying at the transport layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(msg) | Error::Other(msg) => {
                let m = msg.to_ascii_lowercase();
                m.contains("timeout")
                    || m.contains("connection")
                    || m.contains("reset")
                    || m.contains("temporary")
                    || m.contains("429")
                    || m.contains("500")
                    || m.contains("502")
                    || m.contains("503")
                    || m.contains("504")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
