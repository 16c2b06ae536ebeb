use customs_sync_storage::StorageError;

/// Failures at the HTTP boundary of the rate and document sources.
///
/// A rate day with no data is not an error: sources return an empty table.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport failure or a non-success status where one is not a miss.
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The blocking request task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(String),

    /// Missing base URL or credentials.
    #[error("source not configured: {0}")]
    Config(String),
}

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Source(#[from] SourceError),

    /// The consumer of a long-running run went away or asked it to stop.
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
