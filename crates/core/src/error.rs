//! Error types for the lampkit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for lampkit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Filesystem ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a single inference or remote counting call.
///
/// None of these are retried. The experiment driver checkpoints between
/// calls, so surfacing the error is enough to lose nothing but the current
/// item.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The backend answered with a non-success status.
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered, but not in the shape we expected.
    #[error("Malformed response from {backend}: {reason}")]
    MalformedResponse { backend: String, reason: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Local inference failed (tensor ops, weight loading).
    #[error("Inference error: {0}")]
    Inference(String),
}

impl ProviderError {
    /// Shorthand for a [`ProviderError::MalformedResponse`].
    pub fn malformed(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}
