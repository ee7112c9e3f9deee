use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shopmirror_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Record '{id}' not found in '{collection}'")]
    RecordNotFound { collection: String, id: String },
    #[error("{0} collection(s) failed to sync")]
    SyncFailed(usize),
    #[error(
        "Remote is not configured. Set remote_url in the config file or SHOPMIRROR_REMOTE_URL."
    )]
    RemoteNotConfigured,
}
