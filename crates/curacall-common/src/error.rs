use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable process configuration (API key, bad URL, ...).
    /// Never retried automatically.
    #[error("configuration error: {0}")]
    Config(String),

    /// An upstream LLM provider failed: connection refused, non-success
    /// status, or exhausted retries.
    #[error("provider error: {0}")]
    Provider(String),

    /// The conversation store rejected an operation.
    #[error("database error: {0}")]
    Database(String),

    /// A client sent a body this gateway cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for errors a caller may transparently retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(_))
    }
}
