//! Crate-wide error type.
//!
//! Every stage handles its external-call failures at its own boundary and
//! maps them into one of these variants; nothing here is process-fatal and
//! no variant triggers a retry.

use axum::http::StatusCode;

/// Errors produced by the narravox pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No API key is configured, so stages calling external services are
    /// unavailable.
    #[error("No API key configured; set OPENAI_API_KEY or [openai].api_key")]
    MissingCredential,

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested session does not exist.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session is not in a stage that allows the requested action.
    #[error("{0}")]
    Precondition(String),

    /// Another action is already running on this session.
    #[error("Another action is in flight for this session")]
    Busy,

    /// The uploaded bytes could not be decoded as a video container.
    #[error("Video decode failed: {0}")]
    Decode(String),

    /// The script generation stream ended before the completion signal.
    #[error("Script stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Speech synthesis returned a non-success status or an empty body.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// A required external tool is missing or misbehaved.
    #[error("External tool error: {0}")]
    Tool(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a Precondition error.
    pub fn precondition<S: Into<String>>(msg: S) -> Self {
        Self::Precondition(msg.into())
    }

    /// Map to the HTTP status/body pair the route handlers return.
    pub fn http(self) -> (StatusCode, String) {
        let status = match &self {
            Error::MissingCredential => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Precondition(_) | Error::Busy => StatusCode::CONFLICT,
            Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StreamInterrupted(_) | Error::Synthesis(_) => StatusCode::BAD_GATEWAY,
            Error::Tool(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string())
    }
}
