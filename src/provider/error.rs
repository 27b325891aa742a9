//! Provider error taxonomy

/// Errors surfaced by provider construction and completion calls
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Unrecognized provider kind or an unparseable setting
    #[error("Configuration error: {0}")]
    Config(String),
    /// Connection refused, DNS failure, timeout, or a daemon error status
    #[error("Transport error: {0}")]
    Transport(String),
    /// Credential missing or rejected by the hosted API
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Response body present but not in the expected shape
    #[error("Unexpected response: {0}")]
    Protocol(String),
    /// The remote rejected the model identifier
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// Any other error status reported by the hosted API
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    /// Map a reqwest failure onto the transport variant, keeping timeouts recognizable
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            ProviderError::Transport(format!("connection failed: {}", err))
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}
