//! Remote API errors

use thiserror::Error;

/// Retry policy class for API failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    /// Leave the change queued and try again on the next drain
    Retryable,
    /// The server will never accept this change
    Permanent,
    /// The bearer token was rejected
    ReauthRequired,
}

/// Errors returned by a [`RemoteApi`](super::RemoteApi)
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error response from the server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classify error for retry policy
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Unauthorized(_) => ApiRetryClass::ReauthRequired,
            Self::Network(_) | Self::Http(_) => ApiRetryClass::Retryable,
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Json(_) => ApiRetryClass::Permanent,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.retry_class() == ApiRetryClass::ReauthRequired
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

/// Result type for remote API calls
pub type ApiResult<T> = Result<T, ApiError>;
