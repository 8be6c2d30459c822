//! Error taxonomy shared by every pipeline stage.
//!
//! Each failure the pipeline can surface maps to exactly one [`RagError`]
//! variant, and each variant has a stable machine-readable [`ErrorKind`]
//! code used by the HTTP API and the CLI.
//!
//! Provider adapters report raw upstream failures as [`UpstreamError`];
//! the retrying clients in the app crate decide whether to retry and then
//! convert the final outcome into a [`RagError`].

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the core crate.
pub type RagResult<T> = Result<T, RagError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    /// Invalid chunking, retrieval, or runtime configuration. Raised before
    /// any network call is made.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed request input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("embedding service error after {attempts} attempt(s): {detail}")]
    EmbeddingService { attempts: u32, detail: String },

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("retrieval timed out after {0} ms")]
    RetrievalTimeout(u64),

    #[error("chat model unavailable after {attempts} attempt(s): {detail}")]
    ModelUnavailable { attempts: u32, detail: String },

    #[error("chat model response invalid: {0}")]
    ModelResponseInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Stable error codes, one per [`RagError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Validation,
    EmbeddingService,
    StoreUnavailable,
    RetrievalTimeout,
    ModelUnavailable,
    ModelResponseInvalid,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::EmbeddingService => "embedding_service_error",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::RetrievalTimeout => "retrieval_timeout",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::ModelResponseInvalid => "model_response_invalid",
            ErrorKind::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Config(_) => ErrorKind::Config,
            RagError::Validation(_) => ErrorKind::Validation,
            RagError::EmbeddingService { .. } => ErrorKind::EmbeddingService,
            RagError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            RagError::RetrievalTimeout(_) => ErrorKind::RetrievalTimeout,
            RagError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            RagError::ModelResponseInvalid(_) => ErrorKind::ModelResponseInvalid,
            RagError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Whether the failure came from a degraded upstream service (as opposed
    /// to bad input or configuration).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EmbeddingService
                | ErrorKind::StoreUnavailable
                | ErrorKind::RetrievalTimeout
                | ErrorKind::ModelUnavailable
                | ErrorKind::ModelResponseInvalid
        )
    }
}

/// A single failed call to an external embedding or chat service.
///
/// Adapters classify every failure into one of these variants so callers
/// never branch on status codes or message text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// HTTP 429.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// HTTP 5xx.
    #[error("server error: {0}")]
    Server(String),
    /// Connection failure or client-side timeout.
    #[error("network error: {0}")]
    Network(String),
    /// HTTP 401/403 or a missing credential.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Any other HTTP 4xx.
    #[error("request rejected: {0}")]
    BadRequest(String),
    /// A 2xx response whose body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Rate limits, server errors, and network failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited(_) | UpstreamError::Server(_) | UpstreamError::Network(_)
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, body);
        match status {
            429 => UpstreamError::RateLimited(detail),
            401 | 403 => UpstreamError::Auth(detail),
            500..=599 => UpstreamError::Server(detail),
            _ => UpstreamError::BadRequest(detail),
        }
    }
}
