//! Error types for the engram engine

use thiserror::Error;

/// Result type alias for engram operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the engram engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failure — fatal for the store instance
    #[error("schema migration error: {0}")]
    Migration(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Topic classification backend error
    #[error("classifier error: {0}")]
    Classifier(String),

    /// LLM client error
    #[error("llm error: {0}")]
    Llm(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
