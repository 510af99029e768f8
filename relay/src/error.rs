use thiserror::Error;

use crate::mcp::schema::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid params: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No active transport connection")]
    NoSession,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{kind} already registered: {name}")]
    DuplicateCapability { kind: &'static str, name: String },

    #[error("{0}")]
    Handler(String),

    #[error("Handler timed out after {0}ms")]
    Timeout(u64),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Too many concurrent sessions")]
    TooManySessions,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand used by handlers to fail with a readable message.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
