/// All errors that can be returned by a SyncStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write. For `operation_locks` this
    /// is the "currently locked" signal.
    #[error("duplicate key in {table}: {key}")]
    Duplicate { table: String, key: String },

    /// No record with the given key.
    #[error("{table} not found: {key}")]
    NotFound { table: String, key: String },

    /// A sync job transition was attempted from a state that does not allow it.
    /// Only `processing` jobs can move to a terminal state.
    #[error("sync job {job_id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        job_id: i64,
        from: String,
        to: String,
    },

    /// The operation log entry already carries a terminal status.
    #[error("operation log {log_id} already finished")]
    AlreadyFinished { log_id: i64 },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(table: &str, key: impl ToString) -> Self {
        StorageError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn duplicate(table: &str, key: impl ToString) -> Self {
        StorageError::Duplicate {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}
