//! Error types for backend HTTP calls.
//!
//! Uses `thiserror` for typed errors; each converts into the
//! [`SourceError`] or [`FetchError`] the core seams expect.

use twin_core::engine::FetchError;
use twin_core::sources::SourceError;

/// Longest error body kept in an error message.
const MAX_BODY_CHARS: usize = 200;

/// Errors that can occur talking to the backend or the artifact host.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request could not be built, sent, or timed out.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// The response body did not decode.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// A configured base URL cannot carry path segments.
    #[error("invalid base URL `{0}`")]
    InvalidUrl(String),
}

impl BackendError {
    /// Build a status error, keeping only the start of `body`.
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        }
    }
}

impl From<BackendError> for SourceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, .. } => Self::Status { status },
            BackendError::Decode(msg) => Self::Malformed(msg),
            other => Self::Request(other.to_string()),
        }
    }
}

impl From<BackendError> for FetchError {
    fn from(err: BackendError) -> Self {
        Self(err.to_string())
    }
}
