pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{
    DeclarationRecord, DeclarationStats, DeclarationSummaryRecord, ExchangeRateRecord, JobCounter,
    JobStatus, JobTransition, LockRecord, NewDeclaration, NewOperationLog, NewSyncJob,
    NewSyncJobError, OperationLogFinish, OperationLogRecord, OperationStatus, RateRow,
    RateUpsertCounts, SavedDeclaration, SyncJobErrorRecord, SyncJobRecord, UpsertOutcome,
};
pub use traits::SyncStore;
