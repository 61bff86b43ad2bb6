//! Error types for chathub-ollama

use thiserror::Error;

/// Result type alias using chathub-ollama Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an Ollama server
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("Ollama error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request was cancelled by the caller
    #[error("Request aborted")]
    Aborted,

    /// The response stream broke off or reported an error
    #[error("Stream error: {0}")]
    Stream(String),
}

impl Error {
    pub fn api(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Api {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<Error> for chathub_core::Error {
    fn from(e: Error) -> Self {
        chathub_core::Error::backend(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_falls_back_to_status_text() {
        let e = Error::api(reqwest::StatusCode::NOT_FOUND, "");
        assert_eq!(e.to_string(), "Ollama error (404): 404 Not Found");

        let e = Error::api(reqwest::StatusCode::BAD_REQUEST, "model 'x' not found");
        assert_eq!(e.to_string(), "Ollama error (400): model 'x' not found");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::api(reqwest::StatusCode::SERVICE_UNAVAILABLE, "busy").is_retryable());
        assert!(Error::api(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(!Error::api(reqwest::StatusCode::NOT_FOUND, "gone").is_retryable());
        assert!(!Error::Aborted.is_retryable());
    }

    #[test]
    fn test_converts_into_core_backend_error() {
        let core: chathub_core::Error = Error::Stream("model crashed".into()).into();
        assert!(matches!(core, chathub_core::Error::Backend(_)));
        assert_eq!(core.to_string(), "Stream error: model crashed");
    }
}
