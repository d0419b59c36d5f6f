use thiserror::Error;

/// Adapter-level failures.
///
/// Display strings are what the error classifier pattern-matches, so the
/// variants embed upstream status codes and bodies verbatim.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Fixed error kind for capability-gated operations.
    #[error("{provider} does not support {operation}")]
    NotSupported {
        provider: String,
        operation: &'static str,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Inter-chunk idle timeout on a streaming response; retryable.
    #[error("stream idle for {seconds}s, aborting upstream read")]
    StreamIdle { seconds: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("stream decode error: {0}")]
    Decode(String),

    #[error("invalid adapter configuration: {0}")]
    Config(String),
}

impl ProviderError {
    #[must_use]
    pub fn not_supported(provider: &str, operation: &'static str) -> Self {
        Self::NotSupported {
            provider: provider.to_string(),
            operation,
        }
    }

    /// Map a transport error, folding reqwest's timeout flavor into
    /// [`ProviderError::Timeout`].
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                seconds: timeout_secs,
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}
