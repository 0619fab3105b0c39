//! Error types for wechat-channel
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for wechat-channel operations.
#[derive(Error, Debug)]
pub enum WeChatError {
    /// Configuration-related errors (missing token, missing base URL, bad robot id, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend answered with an envelope whose `code` is not 200.
    ///
    /// Carries the backend's own message, its status code and the raw body so
    /// callers can surface or log the exact response.
    #[error("Backend error {code}: {message}")]
    Backend {
        code: i64,
        message: String,
        body: String,
    },

    /// A backend call exceeded its per-call timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Channel errors (poller lifecycle, delivery failures, invalid targets, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Errors reported by the host runtime (pairing store, reply pipeline)
    #[error("Host error: {0}")]
    Host(String),

    /// Message bus channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Resource not found (accounts, actions, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WeChatError {
    /// Returns `true` for application-level errors reported inside the backend envelope.
    pub fn is_backend(&self) -> bool {
        matches!(self, WeChatError::Backend { .. })
    }

    /// Returns `true` if the error came from a per-call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WeChatError::Timeout(_))
    }

    /// The backend envelope code, if this is a backend error.
    pub fn backend_code(&self) -> Option<i64> {
        match self {
            WeChatError::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A specialized `Result` type for wechat-channel operations.
pub type Result<T> = std::result::Result<T, WeChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WeChatError::Config("missing token".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing token");
    }

    #[test]
    fn test_backend_error_display() {
        let err = WeChatError::Backend {
            code: 500,
            message: "robot offline".to_string(),
            body: r#"{"code":500,"message":"robot offline"}"#.to_string(),
        };
        assert_eq!(err.to_string(), "Backend error 500: robot offline");
        assert!(err.is_backend());
        assert_eq!(err.backend_code(), Some(500));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_classification() {
        let err = WeChatError::Timeout("request timed out after 10000ms".into());
        assert!(err.is_timeout());
        assert!(!err.is_backend());
        assert_eq!(err.backend_code(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WeChatError = io_err.into();
        assert!(matches!(err, WeChatError::Io(_)));
    }

    #[test]
    fn test_error_variants() {
        let _ = WeChatError::Config("test".into());
        let _ = WeChatError::Channel("test".into());
        let _ = WeChatError::Host("test".into());
        let _ = WeChatError::BusClosed;
        let _ = WeChatError::NotFound("test".into());
    }
}
