//! Remote object store error types
//!
//! Maps backend failures onto the two outcomes callers act on: the object is
//! not there, or the store is (perhaps briefly) unreachable.

/// Remote object store errors
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Authentication expired, token needs refresh")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    ///
    /// Puts and gets are idempotent, so any retryable failure can be
    /// replayed with the same key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited
                | RemoteError::Timeout
                | RemoteError::Network(_)
                | RemoteError::Server(_, _)
                | RemoteError::AuthExpired
                | RemoteError::Io(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Create a RemoteError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => RemoteError::AuthExpired,
            403 => RemoteError::Forbidden(body.to_string()),
            404 => RemoteError::NotFound(body.to_string()),
            408 => RemoteError::Timeout,
            429 => RemoteError::RateLimited,
            500..=599 => RemoteError::Server(status, body.to_string()),
            _ => RemoteError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            RemoteError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::from_status(status.as_u16(), &err.to_string())
        } else {
            RemoteError::Request(err.to_string())
        }
    }
}

/// Result type for remote object store operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
