//! Error types for registry and storage operations

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connection, TLS, DNS and timeout failures. Never retried.
    #[error("Network error: {0}")]
    Network(String),

    /// Challenge resolution or credential failures
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Registry answered with a status the operation does not accept
    #[error("{operation} failed with status {status}: {body}")]
    Protocol {
        operation: String,
        status: u16,
        body: String,
    },

    /// No usable entry in a manifest list or image index
    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Storage error: failed to {context} at {}: {source}", path.display())]
    Storage {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn storage(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Storage {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    pub fn protocol(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        RegistryError::Protocol {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Response body text for protocol errors, empty otherwise
    pub fn body(&self) -> &str {
        match self {
            RegistryError::Protocol { body, .. } => body,
            _ => "",
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}
