use thiserror::Error;
use serde::Serialize;

/// Common error type for ChatRelay with clear taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Client request errors (4xx)
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request validation failed: {0}")]
    ValidationFailed(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Completion provider errors
    #[error("Completion provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO and serialization errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic anyhow error for flexibility
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            // 4xx Client Errors
            Error::BadRequest(_) => 400,
            Error::ValidationFailed(_) => 400,
            Error::NotFound(_) => 404,
            Error::RateLimitExceeded => 429,

            // Upstream failures surface as a bad gateway
            Error::Provider { .. } => 502,
            Error::ServiceUnavailable(_) => 503,
            Error::Timeout(_) => 504,

            // Internal Errors
            Error::Internal(_) => 500,
            Error::ConfigError(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Anyhow(_) => 500,
        }
    }

    /// Get error type for metrics/logging
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::ValidationFailed(_) => "validation_failed",
            Error::NotFound(_) => "not_found",
            Error::RateLimitExceeded => "rate_limit",
            Error::Provider { .. } => "provider_error",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::Timeout(_) => "timeout",
            Error::Internal(_) => "internal",
            Error::ConfigError(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Anyhow(_) => "unknown",
        }
    }

    /// Whether a caller could reasonably try again. Nothing in the relay path
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable(_) | Error::Timeout(_) | Error::Io(_) => true,
            Error::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Error response for HTTP API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse {
            error: ErrorDetail {
                message: err.to_string(),
                r#type: err.error_type().to_string(),
                code: err.status_code(),
            },
            request_id: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
