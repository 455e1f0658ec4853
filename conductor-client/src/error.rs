//! Error types for the Conductor client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the orchestration or coordination service
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 404 {
            return Self::NotFound(message);
        }
        Self::ApiError { status, message }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// Check if retrying the same request later may succeed
    ///
    /// Network failures, timeouts, throttling and server errors are transient.
    /// Not-found and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_404_maps_to_not_found() {
        let err = ClientError::api_error(404, "job/1");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::api_error(503, "unavailable").is_transient());
        assert!(ClientError::api_error(429, "slow down").is_transient());
        assert!(!ClientError::api_error(400, "bad").is_transient());
        assert!(!ClientError::ParseError("eof".to_string()).is_transient());
    }

    #[test]
    fn test_status_families() {
        assert!(ClientError::api_error(409, "conflict").is_client_error());
        assert!(ClientError::api_error(500, "oops").is_server_error());
        assert!(!ClientError::api_error(500, "oops").is_client_error());
    }
}
