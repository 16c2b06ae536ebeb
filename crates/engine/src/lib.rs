//! customs-sync engine -- ingests daily exchange rates and customs
//! declarations into a `SyncStore`, resumably and idempotently.
//!
//! Building blocks, leaves first:
//! - [`period`] splits date ranges into bounded chunks.
//! - [`lock`] and [`oplog`] give TTL mutual exclusion and an audit trail.
//! - [`source`] holds the HTTP boundaries (rate table, declaration API).
//! - [`rates`] and [`jobs`] orchestrate rate syncs and declaration syncs.
//! - [`scanner`], [`extract`] and [`summary`] drive the summary backfill.
//! - [`cache`] and [`audit`] serve the read side.

pub mod audit;
pub mod cache;
pub mod clock;
mod error;
pub mod extract;
pub mod jobs;
pub mod lock;
pub mod oplog;
pub mod period;
pub mod rates;
pub mod scanner;
pub mod source;
pub mod summary;

pub use audit::{AuditEvent, AuditSummary, RateAudit};
pub use cache::StatsCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, SourceError};
pub use extract::{extract_parties, extract_summary, DeclarationParties, ExtractedSummary};
pub use jobs::{CancelProbe, DeclarationSyncer, JobConfig, JobView, SyncJobs};
pub use lock::{LockOutcome, LockRequest, OperationLock};
pub use oplog::{LogScope, OperationLog};
pub use period::{split, Period};
pub use rates::{ExchangeRateSyncer, RateProgress, RateSyncConfig, RateSyncMode, RateSyncReport};
pub use scanner::{CursorScanner, KeysetSource, Page};
pub use source::{
    DeclarationDocument, DocumentSource, HttpDocumentSource, HttpRateSource, RateSource,
};
pub use summary::{update_declaration_summary, BackfillPage, BackfillTotals, SummaryBackfill};

/// Result of a run guarded by an operation lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome<T> {
    Completed(T),
    /// Another run holds the scope. Nothing was done.
    Locked,
}

impl<T> SyncOutcome<T> {
    pub fn is_locked(&self) -> bool {
        matches!(self, SyncOutcome::Locked)
    }
}
