use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No route for key: {0}")]
    NoRoute(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("DNS resolution error: {0}")]
    Dns(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for BotError {
    fn from(error: rusqlite::Error) -> Self {
        BotError::Database(error.to_string())
    }
}

impl From<object_store::Error> for BotError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => BotError::ObjectNotFound(path),
            other => BotError::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BotError::Timeout(error.to_string())
        } else {
            BotError::Http(error.to_string())
        }
    }
}

impl BotError {
    /// Request-scoped failures that a later round may succeed on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::Http(_)
                | BotError::Dns(_)
                | BotError::Timeout(_)
                | BotError::Storage(_)
                | BotError::Database(_)
                | BotError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
