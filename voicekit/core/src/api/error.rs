//! API Error Taxonomy
//!
//! Every collaborator call reports failures through [`ApiError`]. Token
//! failures are singled out because they are the only ones the
//! [`TokenRetry`](super::retry::TokenRetry) wrapper replays.

use thiserror::Error;

/// Failure of a backend call
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never got an HTTP answer
    #[error("Transport failure: {0}")]
    Transport(String),

    /// No access token is available
    #[error("Missing access token")]
    MissingToken,

    /// The access token was rejected
    #[error("Invalid or expired access token")]
    InvalidToken,

    /// The resource does not exist
    #[error("Resource not found")]
    NotFound,

    /// The backend failed (5xx)
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Any other non-success status
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The assistant understood nothing it could act on
    #[error("No skill could handle the request ({intent})")]
    Unresolved {
        /// Intent reported by the backend, if any
        intent: String,
    },
}

/// Generic `(code, status, message)` triple shown by host surfaces
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    /// Stable machine-readable code
    pub code: &'static str,
    /// HTTP status when there was one
    pub status: Option<u16>,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    /// Whether a token refresh may fix this failure
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::MissingToken | Self::InvalidToken)
    }

    /// Map a non-success HTTP status and body to an error
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 => Self::InvalidToken,
            403 if message.to_ascii_lowercase().contains("token") => Self::MissingToken,
            404 => Self::NotFound,
            422 => Self::Unresolved { intent: message },
            500..=599 => Self::Server { status, message },
            _ => Self::Http { status, message },
        }
    }

    /// The generic triple for this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        let (code, status) = match self {
            Self::Transport(_) => ("transport", None),
            Self::MissingToken => ("missing_token", Some(403)),
            Self::InvalidToken => ("invalid_token", Some(401)),
            Self::NotFound => ("not_found", Some(404)),
            Self::Server { status, .. } => ("server_error", Some(*status)),
            Self::Http { status, .. } => ("http_error", Some(*status)),
            Self::Decode(_) => ("decode_error", None),
            Self::Unresolved { .. } => ("unresolved", None),
        };
        ErrorCode {
            code,
            status,
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
