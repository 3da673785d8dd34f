use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The error-page renderer does not know this status code
    #[error("No error page for status code {0}")]
    InvalidStatus(u16),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::Upstream(err.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
