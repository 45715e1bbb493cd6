//! Error types for the Gantry client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the coordinator
///
/// The split between `RequestFailed` (transport) and `ApiError` (the
/// backend answered with a non-OK status) is load-bearing: the agent maps
/// the former to `BackendUnreachable` and the latter to `BackendFailure`
/// when result submission retries are exhausted.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
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
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Whether the backend replied at all (as opposed to being unreachable)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ApiError { .. })
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        let rejected = ClientError::api_error(500, "boom");
        assert!(rejected.is_rejection());
        assert!(rejected.is_server_error());

        let rejected = ClientError::api_error(422, "bad payload");
        assert!(rejected.is_rejection());
        assert!(!rejected.is_server_error());

        let parse = ClientError::ParseError("truncated".to_string());
        assert!(!parse.is_rejection());
    }
}
