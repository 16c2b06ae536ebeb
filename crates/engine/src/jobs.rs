//! Declaration sync jobs.
//!
//! A job moves `processing → completed | cancelled | error` and never leaves
//! a terminal status; the store enforces this with conditional updates.
//!
//! [`DeclarationSyncer`] runs a job in two phases:
//! 1. split the job's range into ingestion chunks and list each chunk's
//!    GUIDs, retrying a failing chunk up to `max_chunk_attempts` times;
//! 2. fetch every discovered GUID, store the declaration and derive its
//!    summary.
//!
//! Failures are appended to the job's error log and the run goes on, unless
//! `fatal_chunk_errors` is set. Cancellation is cooperative: the persisted
//! status is checked before every chunk and every GUID.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use customs_sync_storage::{
    DeclarationStats, JobCounter, JobStatus, JobTransition, NewDeclaration, NewSyncJob,
    NewSyncJobError, OperationStatus, StorageError, SyncJobErrorRecord, SyncJobRecord, SyncStore,
};
use serde::Serialize;
use serde_json::json;
use time::Date;

use crate::cache::StatsCache;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::lock::{declarations_scope, LockRequest, OperationLock, Scoped};
use crate::oplog::{LogScope, OperationLog};
use crate::period::{format_day, split, Period, INGEST_CHUNK_DAYS};
use crate::source::DocumentSource;
use crate::summary::update_declaration_summary;
use crate::SyncOutcome;

pub const SYNC_OPERATION: &str = "declarations.sync";
pub const ERROR_GUID_LIST: &str = "guid_list";
pub const ERROR_DOCUMENT_FETCH: &str = "document_fetch";

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub chunk_days: u32,
    pub max_chunk_attempts: u32,
    /// A chunk that exhausts its attempts fails the whole job.
    pub fatal_chunk_errors: bool,
    /// Pause before retrying a chunk whose listing failed.
    pub retry_delay: Duration,
    pub lock_ttl: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_days: INGEST_CHUNK_DAYS,
            max_chunk_attempts: 3,
            fatal_chunk_errors: false,
            retry_delay: Duration::from_secs(1),
            lock_ttl: Duration::from_secs(7200),
        }
    }
}

/// A job with its error log.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job: SyncJobRecord,
    pub errors: Vec<SyncJobErrorRecord>,
}

// ──────────────────────────────────────────────
// State machine
// ──────────────────────────────────────────────

pub struct SyncJobs {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
}

impl SyncJobs {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(
        &self,
        company_id: i64,
        date_from: Date,
        date_to: Date,
    ) -> Result<SyncJobRecord, StorageError> {
        let range = Period::new(date_from, date_to);
        self.store
            .insert_sync_job(&NewSyncJob {
                company_id,
                date_from: range.start,
                date_to: range.end,
                created_at: self.clock.now(),
            })
            .await
    }

    pub async fn get(&self, job_id: i64) -> Result<JobView, StorageError> {
        let job = self.store.get_sync_job(job_id).await?;
        let errors = self.store.list_sync_job_errors(job_id).await?;
        Ok(JobView { job, errors })
    }

    /// Request cancellation. Only a `processing` job can be cancelled; any
    /// other status is `StorageError::InvalidTransition`.
    pub async fn cancel(&self, job_id: i64) -> Result<SyncJobRecord, StorageError> {
        let job = self.transition(job_id, JobStatus::Cancelled, None).await?;
        tracing::info!(job_id, "sync job cancelled");
        Ok(job)
    }

    pub(crate) async fn transition(
        &self,
        job_id: i64,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<SyncJobRecord, StorageError> {
        self.store
            .transition_sync_job(
                job_id,
                &JobTransition {
                    to,
                    error_message,
                    at: self.clock.now(),
                },
            )
            .await
    }

    /// Terminal transition that tolerates losing a race with a concurrent
    /// one (typically a cancel). Returns the job as stored afterwards.
    pub(crate) async fn settle(
        &self,
        job_id: i64,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<SyncJobRecord, StorageError> {
        match self.transition(job_id, to, error_message).await {
            Ok(job) => Ok(job),
            Err(StorageError::InvalidTransition { from, .. }) => {
                tracing::info!(job_id, %from, to = %to, "job already settled");
                self.store.get_sync_job(job_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub fn probe(&self, job_id: i64) -> CancelProbe {
        CancelProbe {
            store: self.store.clone(),
            job_id,
        }
    }
}

/// Reads the persisted status, so a cancel from any caller is seen.
pub struct CancelProbe {
    store: Arc<dyn SyncStore>,
    job_id: i64,
}

impl CancelProbe {
    /// True once the job is no longer `processing`.
    pub async fn should_stop(&self) -> Result<bool, StorageError> {
        let job = self.store.get_sync_job(self.job_id).await?;
        Ok(job.status != JobStatus::Processing)
    }
}

// ──────────────────────────────────────────────
// Orchestrator
// ──────────────────────────────────────────────

/// How a run ended before reaching the completion transition.
enum Stop {
    Finished,
    Cancelled,
    Failed(String),
}

/// Result of listing one phase-1 chunk.
enum ChunkListing {
    Listed(Vec<String>),
    /// Every attempt failed.
    Exhausted,
    /// The job was cancelled while waiting to retry.
    Cancelled,
}

pub struct DeclarationSyncer {
    store: Arc<dyn SyncStore>,
    source: Arc<dyn DocumentSource>,
    clock: Arc<dyn Clock>,
    jobs: SyncJobs,
    lock: OperationLock,
    oplog: OperationLog,
    config: JobConfig,
    stats: Option<Arc<StatsCache<i64, DeclarationStats>>>,
}

impl DeclarationSyncer {
    pub fn new(
        store: Arc<dyn SyncStore>,
        source: Arc<dyn DocumentSource>,
        clock: Arc<dyn Clock>,
        config: JobConfig,
    ) -> Self {
        Self {
            jobs: SyncJobs::new(store.clone(), clock.clone()),
            lock: OperationLock::new(store.clone(), clock.clone()),
            oplog: OperationLog::new(store.clone(), clock.clone()),
            store,
            source,
            clock,
            config,
            stats: None,
        }
    }

    /// Invalidate a company's cached stats whenever it is synced.
    pub fn with_stats_cache(mut self, cache: Arc<StatsCache<i64, DeclarationStats>>) -> Self {
        self.stats = Some(cache);
        self
    }

    pub fn jobs(&self) -> &SyncJobs {
        &self.jobs
    }

    /// Create a job for the company and run it to a terminal status, under
    /// the company's `DECLARATIONS:<id>` lock.
    pub async fn run(
        &self,
        company_id: i64,
        date_from: Date,
        date_to: Date,
    ) -> Result<SyncOutcome<SyncJobRecord>, EngineError> {
        let range = Period::new(date_from, date_to);
        let request =
            LockRequest::new(declarations_scope(company_id), SYNC_OPERATION, self.config.lock_ttl)
                .company(company_id);

        let scoped = self
            .lock
            .scoped(&request, self.create_and_drive(company_id, range))
            .await?;

        if let Some(cache) = &self.stats {
            cache.invalidate(&company_id);
        }

        match scoped {
            Scoped::Ran(result) => result.map(SyncOutcome::Completed),
            Scoped::Locked => {
                self.oplog
                    .record_blocked(
                        SYNC_OPERATION,
                        LogScope::company(company_id),
                        json!({ "from": format_day(range.start), "to": format_day(range.end) }),
                    )
                    .await;
                Ok(SyncOutcome::Locked)
            }
        }
    }

    async fn create_and_drive(
        &self,
        company_id: i64,
        range: Period,
    ) -> Result<SyncJobRecord, EngineError> {
        let job = self.jobs.create(company_id, range.start, range.end).await?;
        let log_id = self
            .oplog
            .start_quietly(
                SYNC_OPERATION,
                LogScope::company(company_id),
                json!({
                    "jobId": job.id,
                    "from": format_day(range.start),
                    "to": format_day(range.end),
                }),
            )
            .await;
        tracing::info!(job_id = job.id, company_id, from = %range.start, to = %range.end, "declaration sync started");

        let stop = match self.drive(&job).await {
            Ok(stop) => stop,
            Err(e) => Stop::Failed(e.to_string()),
        };

        let settled = match &stop {
            Stop::Finished => self.jobs.settle(job.id, JobStatus::Completed, None).await,
            Stop::Cancelled => self.store.get_sync_job(job.id).await,
            Stop::Failed(message) => {
                tracing::error!(job_id = job.id, error = %message, "declaration sync failed");
                self.jobs
                    .settle(job.id, JobStatus::Error, Some(message.clone()))
                    .await
            }
        };

        let (status, details) = match (&stop, &settled) {
            (_, Err(e)) => (OperationStatus::Error, Some(e.to_string())),
            (Stop::Failed(message), _) => (OperationStatus::Error, Some(message.clone())),
            _ => (OperationStatus::Success, None),
        };
        let final_meta = settled.as_ref().ok().map(|j| {
            json!({
                "status": j.status,
                "totalChunks": j.total_chunks,
                "completedChunks": j.completed_chunks,
                "failedChunks": j.failed_chunks,
                "totalGuids": j.total_guids,
                "completed": j.completed,
            })
        });
        self.oplog
            .finish_quietly(log_id, status, details, final_meta)
            .await;

        let job = settled?;
        tracing::info!(
            job_id = job.id,
            status = %job.status,
            chunks = job.completed_chunks,
            failed_chunks = job.failed_chunks,
            guids = job.completed,
            "declaration sync finished"
        );
        Ok(job)
    }

    async fn drive(&self, job: &SyncJobRecord) -> Result<Stop, EngineError> {
        let probe = self.jobs.probe(job.id);
        let chunks = split(job.date_from, job.date_to, self.config.chunk_days);
        self.store
            .set_sync_job_totals(job.id, Some(chunks.len() as i64), None, self.clock.now())
            .await?;

        // Phase 1: discover GUIDs chunk by chunk.
        let mut seen = HashSet::new();
        let mut work: Vec<(i64, Period, String)> = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if probe.should_stop().await? {
                return Ok(Stop::Cancelled);
            }
            let chunk_number = index as i64 + 1;
            match self.list_chunk(job.id, chunk_number, chunk, &probe).await? {
                ChunkListing::Cancelled => return Ok(Stop::Cancelled),
                ChunkListing::Listed(guids) => {
                    for guid in guids {
                        if seen.insert(guid.clone()) {
                            work.push((chunk_number, *chunk, guid));
                        }
                    }
                }
                ChunkListing::Exhausted if self.config.fatal_chunk_errors => {
                    return Ok(Stop::Failed(format!(
                        "chunk {chunk_number} ({} .. {}) failed after {} attempts",
                        chunk.start, chunk.end, self.config.max_chunk_attempts.max(1)
                    )));
                }
                ChunkListing::Exhausted => {}
            }
        }

        // Phase 2: fetch and store each document.
        self.store
            .set_sync_job_totals(job.id, None, Some(work.len() as i64), self.clock.now())
            .await?;
        for (chunk_number, chunk, guid) in &work {
            if probe.should_stop().await? {
                return Ok(Stop::Cancelled);
            }
            self.ingest_document(job, *chunk_number, chunk, guid).await?;
        }

        Ok(Stop::Finished)
    }

    /// List one chunk's GUIDs with retries, pausing `retry_delay` and
    /// checking for cancellation before each retry.
    async fn list_chunk(
        &self,
        job_id: i64,
        chunk_number: i64,
        chunk: &Period,
        probe: &CancelProbe,
    ) -> Result<ChunkListing, EngineError> {
        let attempts = self.config.max_chunk_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                if !self.config.retry_delay.is_zero() {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                if probe.should_stop().await? {
                    tracing::info!(job_id, chunk = chunk_number, attempt, "chunk retry cancelled");
                    return Ok(ChunkListing::Cancelled);
                }
            }
            match self.source.list_guids(chunk).await {
                Ok(guids) => {
                    if attempt > 1 {
                        self.store
                            .mark_sync_job_errors_retried(job_id, chunk_number)
                            .await?;
                    }
                    self.store
                        .increment_sync_job(job_id, JobCounter::CompletedChunks, self.clock.now())
                        .await?;
                    tracing::debug!(job_id, chunk = chunk_number, guids = guids.len(), attempt, "chunk listed");
                    return Ok(ChunkListing::Listed(guids));
                }
                Err(e) => {
                    tracing::warn!(job_id, chunk = chunk_number, attempt, error = %e, "chunk listing failed");
                    self.record_error(job_id, chunk_number, chunk, e.to_string(), ERROR_GUID_LIST, attempt)
                        .await?;
                }
            }
        }
        self.store
            .increment_sync_job(job_id, JobCounter::FailedChunks, self.clock.now())
            .await?;
        Ok(ChunkListing::Exhausted)
    }

    /// A source failure for one GUID is recorded and skipped; a storage
    /// failure ends the run.
    async fn ingest_document(
        &self,
        job: &SyncJobRecord,
        chunk_number: i64,
        chunk: &Period,
        guid: &str,
    ) -> Result<(), EngineError> {
        let document = match self.source.fetch_document(guid).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(job_id = job.id, chunk = chunk_number, guid, error = %e, "document fetch failed");
                self.record_error(
                    job.id,
                    chunk_number,
                    chunk,
                    format!("{guid}: {e}"),
                    ERROR_DOCUMENT_FETCH,
                    1,
                )
                .await?;
                return Ok(());
            }
        };

        let now = self.clock.now();
        let saved = self
            .store
            .save_declaration(
                &NewDeclaration {
                    company_id: job.company_id,
                    customs_id: guid.to_string(),
                    mrn: document.mrn,
                    status: document.status,
                    date: document.date,
                    xml_data: document.payload,
                },
                now,
            )
            .await?;
        let stored = self.store.get_declaration(saved.id).await?;
        update_declaration_summary(
            self.store.as_ref(),
            self.clock.as_ref(),
            saved.id,
            &stored.xml_data,
        )
        .await?;
        self.store
            .increment_sync_job(job.id, JobCounter::CompletedGuids, now)
            .await?;
        tracing::debug!(job_id = job.id, guid, declaration_id = saved.id, inserted = saved.inserted, "declaration stored");
        Ok(())
    }

    async fn record_error(
        &self,
        job_id: i64,
        chunk_number: i64,
        chunk: &Period,
        message: String,
        code: &str,
        attempt: u32,
    ) -> Result<(), StorageError> {
        self.store
            .insert_sync_job_error(&NewSyncJobError {
                sync_job_id: job_id,
                chunk_number,
                date_from: chunk.start,
                date_to: chunk.end,
                error_message: message,
                error_code: code.to_string(),
                retry_attempts: i64::from(attempt),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }
}
