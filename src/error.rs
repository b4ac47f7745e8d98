//! Error types for fingerprinting, catalog access and maintenance.

use thiserror::Error;

/// Result type for audiomark operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fingerprinting or matching audio.
///
/// Audio that is too short to fingerprint is not an error: the pipeline
/// returns an empty fingerprint list instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported WAV input.
    #[error("format error: {0}")]
    Format(String),

    /// The catalog backend could not be reached or failed mid-query.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The requested song does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The song exists but has no original audio stored.
    #[error("song {0} has no stored audio")]
    NoStoredAudio(i64),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Blocking work panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound(err.to_string()),
            other => Error::CatalogUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::CatalogUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}
