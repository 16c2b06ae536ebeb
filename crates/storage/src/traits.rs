use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::error::StorageError;
use crate::record::{
    DeclarationRecord, DeclarationStats, DeclarationSummaryRecord, ExchangeRateRecord, JobCounter,
    JobTransition, LockRecord, NewDeclaration, NewOperationLog, NewSyncJob, NewSyncJobError,
    OperationLogFinish, OperationLogRecord, RateRow, RateUpsertCounts, SavedDeclaration,
    SyncJobErrorRecord, SyncJobRecord, UpsertOutcome,
};

/// The storage trait for customs-sync backends.
///
/// A `SyncStore` provides durable storage for operation locks, the operation
/// log, exchange rates, declarations and their summaries, and sync jobs.
///
/// ## Atomicity
///
/// Every method is its own atomic unit. There is no transaction spanning
/// calls: a day's rate upsert, a lock acquisition (purge + insert) and a job
/// transition each commit or fail as a whole. Multi-day and multi-chunk runs
/// are made safe by idempotent upserts, not by long transactions.
///
/// ## Uniqueness
///
/// - `operation_locks.scope_key` is unique. A conflicting insert returns
///   `StorageError::Duplicate`, which callers read as "currently locked".
/// - `exchange_rates` is unique on `(date, currency_code)`.
/// - `declarations` is unique on `(company_id, customs_id)`.
/// - `declaration_summaries` is keyed by `declaration_id`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait SyncStore: Send + Sync + 'static {
    // ── Operation locks ──────────────────────────────────────────────────────

    /// Insert a lock row.
    ///
    /// Any row for the same scope whose `expires_at <= now` is deleted first,
    /// in the same transaction. Returns `Err(StorageError::Duplicate)` when a
    /// live lock already holds the scope.
    async fn insert_lock(&self, lock: &LockRecord, now: OffsetDateTime)
        -> Result<(), StorageError>;

    /// Delete the lock row for a scope. Returns whether a row existed.
    async fn delete_lock(&self, scope_key: &str) -> Result<bool, StorageError>;

    /// Read the lock row for a scope, expired or not.
    async fn get_lock(&self, scope_key: &str) -> Result<Option<LockRecord>, StorageError>;

    // ── Operation log ────────────────────────────────────────────────────────

    /// Append a `started` entry and return its id.
    async fn insert_operation_log(&self, entry: &NewOperationLog) -> Result<i64, StorageError>;

    /// Returns `Err(StorageError::NotFound)` if the entry does not exist.
    async fn get_operation_log(&self, id: i64) -> Result<OperationLogRecord, StorageError>;

    /// Write the terminal status of an entry.
    ///
    /// Conditional on the entry still being `started`; a second finish returns
    /// `Err(StorageError::AlreadyFinished)`.
    async fn finish_operation_log(
        &self,
        id: i64,
        finish: &OperationLogFinish,
    ) -> Result<(), StorageError>;

    /// Most recent entries first, optionally filtered by operation name.
    async fn list_operation_logs(
        &self,
        operation: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OperationLogRecord>, StorageError>;

    // ── Exchange rates ───────────────────────────────────────────────────────

    /// Upsert a full day's rate table keyed by `(date, currency_code)`.
    ///
    /// Existing rows get the new rate, name and `updated_at = now`; absent
    /// rows are inserted. The whole day commits atomically.
    async fn upsert_exchange_rates(
        &self,
        date: Date,
        rows: &[RateRow],
        now: OffsetDateTime,
    ) -> Result<RateUpsertCounts, StorageError>;

    /// Number of stored rows for a day.
    async fn count_exchange_rates(&self, date: Date) -> Result<u64, StorageError>;

    /// Stored rows for a day, ordered by currency code.
    async fn list_exchange_rates(&self, date: Date)
        -> Result<Vec<ExchangeRateRecord>, StorageError>;

    // ── Declarations ─────────────────────────────────────────────────────────

    /// Insert a declaration unless `(company_id, customs_id)` is already
    /// stored. Stored declarations are never modified.
    async fn save_declaration(
        &self,
        declaration: &NewDeclaration,
        now: OffsetDateTime,
    ) -> Result<SavedDeclaration, StorageError>;

    /// Returns `Err(StorageError::NotFound)` if the declaration does not exist.
    async fn get_declaration(&self, id: i64) -> Result<DeclarationRecord, StorageError>;

    /// Keyset page: up to `limit` declarations with `id > cursor` (all ids
    /// when `cursor` is `None`), ascending by id.
    async fn list_declarations_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeclarationRecord>, StorageError>;

    /// Upsert a summary keyed by `declaration_id`.
    ///
    /// When the stored content equals the new content (ignoring
    /// `updated_at`) nothing is written and `Unchanged` is returned.
    async fn upsert_declaration_summary(
        &self,
        summary: &DeclarationSummaryRecord,
    ) -> Result<UpsertOutcome, StorageError>;

    async fn get_declaration_summary(
        &self,
        declaration_id: i64,
    ) -> Result<Option<DeclarationSummaryRecord>, StorageError>;

    /// Aggregate counts over a company's declarations.
    async fn declaration_stats(&self, company_id: i64) -> Result<DeclarationStats, StorageError>;

    // ── Sync jobs ────────────────────────────────────────────────────────────

    /// Create a job in `processing` with zeroed counters.
    async fn insert_sync_job(&self, job: &NewSyncJob) -> Result<SyncJobRecord, StorageError>;

    /// Returns `Err(StorageError::NotFound)` if the job does not exist.
    async fn get_sync_job(&self, id: i64) -> Result<SyncJobRecord, StorageError>;

    /// Set the phase totals. `None` leaves a total untouched.
    async fn set_sync_job_totals(
        &self,
        id: i64,
        total_chunks: Option<i64>,
        total_guids: Option<i64>,
        now: OffsetDateTime,
    ) -> Result<(), StorageError>;

    /// Add one to a counter and return its new value. Counters never decrease.
    async fn increment_sync_job(
        &self,
        id: i64,
        counter: JobCounter,
        now: OffsetDateTime,
    ) -> Result<i64, StorageError>;

    /// Move a `processing` job to a terminal status.
    ///
    /// The update is conditional on `status = 'processing'`. Any other current
    /// status returns `Err(StorageError::InvalidTransition)`. A move to
    /// `cancelled` stamps `cancelled_at`; every terminal move stamps
    /// `finished_at`.
    async fn transition_sync_job(
        &self,
        id: i64,
        transition: &JobTransition,
    ) -> Result<SyncJobRecord, StorageError>;

    /// Append a per-chunk failure record and return its id.
    async fn insert_sync_job_error(&self, error: &NewSyncJobError) -> Result<i64, StorageError>;

    /// Error records of a job in insertion order.
    async fn list_sync_job_errors(
        &self,
        sync_job_id: i64,
    ) -> Result<Vec<SyncJobErrorRecord>, StorageError>;

    /// Flag every error row of a chunk as retried. Returns the number of rows
    /// that changed.
    async fn mark_sync_job_errors_retried(
        &self,
        sync_job_id: i64,
        chunk_number: i64,
    ) -> Result<u64, StorageError>;
}
