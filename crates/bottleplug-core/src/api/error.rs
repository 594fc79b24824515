use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::auth::IdentityError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http {
        status: StatusCode,
        message: String,
        /// Parsed response body; text bodies are kept as a JSON string
        body: Value,
    },

    #[error("Session expired - credentials were cleared")]
    SessionExpired,

    #[error("No credential available for an authenticated request")]
    NotAuthenticated,

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err)
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an HTTP error from a non-2xx status and its raw body.
    /// The message prefers the body's `message`, then `detail`, then `error`.
    pub fn from_response(status: StatusCode, text: &str) -> Self {
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(Self::truncate_body(text)))
        };

        let message = ["message", "detail", "error"]
            .iter()
            .find_map(|field| body.get(field).and_then(Value::as_str))
            .map(Self::truncate_body)
            .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));

        ApiError::Http {
            status,
            message,
            body,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// Parsed error body for HTTP errors
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Errors that mean the caller is no longer signed in
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::SessionExpired | ApiError::NotAuthenticated)
            || self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Network(_) => {
                "Unable to connect to the server. Please check your internet connection."
            }
            ApiError::Timeout => {
                "The request took too long. Please check your connection and try again."
            }
            ApiError::SessionExpired | ApiError::NotAuthenticated => {
                "Your session has expired. Please log in again."
            }
            ApiError::Validation(_) => "Please check your input and try again.",
            ApiError::Identity(_) => "Unable to sign in right now. Please try again.",
            ApiError::Http { status, .. } => match status.as_u16() {
                400 | 422 => "Please check your input and try again.",
                401 => "Your session has expired. Please log in again.",
                403 => "You don't have permission to perform this action.",
                404 => "The requested information could not be found.",
                409 => "This resource already exists.",
                429 => "Too many requests. Please wait a moment and try again.",
                500..=599 => "Our servers are experiencing issues. Please try again later.",
                _ => "Something went wrong. Please try again.",
            },
            _ => "Something went wrong. Please try again.",
        }
    }

    /// Message for logs
    pub fn technical_message(&self) -> String {
        match self {
            ApiError::Http { status, message, .. } => format!("HTTP {}: {}", status.as_u16(), message),
            ApiError::Network(_) => "Network error: Unable to reach the server".to_string(),
            ApiError::Timeout => "Request timeout".to_string(),
            other => other.to_string(),
        }
    }
}
