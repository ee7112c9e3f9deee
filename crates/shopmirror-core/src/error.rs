//! Error types for shopmirror-core

use thiserror::Error;

/// Result type alias using shopmirror-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shopmirror-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store that was not declared when the local store was opened
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// The local store could not be opened; cached after the first failure
    #[error("Local store unavailable: {0}")]
    StoreUnavailable(String),

    /// The persisted store set is newer than the one requested
    #[error("Store set version {requested} is older than persisted version {persisted}")]
    VersionDowngrade { requested: u32, persisted: u32 },

    /// A collection that is not in the registry
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Remote source rejected or failed a request
    #[error("Remote error: {0}")]
    Remote(String),

    /// HTTP transport error talking to the remote source
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Realtime subscription failed or was cancelled by the remote
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
