//! Error types for prompt-eval operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API interactions
//! - Result/status persistence
//! - Evaluation lifecycle operations
//!
//! Lifecycle errors carry a [`ErrorKind`] so callers at the edge (CLI, HTTP
//! adapters) can map them onto their own status vocabulary without string
//! matching.

use thiserror::Error;

/// Errors that can occur during LLM API interactions.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model invocation timed out after {0}ms")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Returns true when the provider signalled rate limiting or throttling.
    ///
    /// Besides the dedicated variant and HTTP 429, providers routinely report
    /// throttling inside generic error bodies, so the message text is checked
    /// as well.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            LlmError::RateLimited(_) => true,
            LlmError::ApiError { code: 429, .. } => true,
            other => is_rate_limit_message(&other.to_string()),
        }
    }
}

/// Classifies a free-form error message as a rate-limit signal.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("throttl")
}

/// Errors raised by result/status stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration '{name}' failed: {reason}")]
    Migration { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Store write queue is closed")]
    QueueClosed,
}

/// Coarse classification of lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidState,
    Validation,
    Timeout,
    Store,
    Llm,
    Internal,
}

/// Errors raised by evaluation lifecycle operations and scheduler passes.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Evaluation exceeded timeout limit")]
    TimeoutExceeded,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvaluationError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvaluationError::NotFound(_) => ErrorKind::NotFound,
            EvaluationError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            EvaluationError::InvalidState(_) => ErrorKind::InvalidState,
            EvaluationError::Validation(_) => ErrorKind::Validation,
            EvaluationError::TimeoutExceeded => ErrorKind::Timeout,
            EvaluationError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            EvaluationError::Store(_) => ErrorKind::Store,
            EvaluationError::Llm(_) => ErrorKind::Llm,
            EvaluationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::InvalidState | ErrorKind::Validation => 400,
            ErrorKind::Timeout | ErrorKind::Store | ErrorKind::Llm | ErrorKind::Internal => 500,
        }
    }

    /// Whether retrying the same call can succeed without changing its input.
    ///
    /// Guard failures are synchronous and final; only infrastructure errors
    /// are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EvaluationError::Llm(_) => true,
            EvaluationError::Store(StoreError::Database(_)) => true,
            EvaluationError::Store(StoreError::QueueClosed) => false,
            _ => false,
        }
    }

    /// Builds the not-found error for an evaluation id.
    pub fn evaluation_not_found(id: i64) -> Self {
        EvaluationError::NotFound(format!("Evaluation {}", id))
    }
}
