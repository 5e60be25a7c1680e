use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corpus has no indexable content")]
    EmptyCorpus,

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a call to an external collaborator (embedding service, judge,
/// vector store). Never surfaced to a retrieval caller; stages fall back instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Timeouts, connection errors, HTTP 429 and HTTP 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Decode(_) | Self::Unavailable(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
