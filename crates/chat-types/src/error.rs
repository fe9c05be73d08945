use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("A response is already being generated")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Import rejected: {0}")]
    Import(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JS interop error: {0}")]
    JsInterop(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}
