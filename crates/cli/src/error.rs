use customs_sync_engine::{EngineError, SourceError};
use customs_sync_storage::StorageError;

use crate::config::ConfigError;

/// Exit status for a run refused because its scope is locked.
pub const EXIT_LOCKED: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0} is already running")]
    Locked(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Locked(_) => EXIT_LOCKED,
            _ => 1,
        }
    }
}
