//! Error types for whale analysis

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the analysis engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Provider transport errors
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Provider call timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    // Analysis errors
    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Portfolio fetch failed for {address} after {attempts} attempts: {reason}")]
    FetchFailed {
        address: String,
        attempts: u32,
        reason: String,
    },

    #[error("Analysis not found or expired: {0}")]
    AnalysisNotFound(String),

    #[error("Invalid ranking bucket: {0}")]
    InvalidBucket(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientNetwork(_) | Error::RateLimited(_) | Error::Timeout(_) => true,
            Error::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error came from provider throttling (HTTP 429)
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::TransientNetwork(format!("request timed out: {}", e))
        } else if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::TransientNetwork(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
