//! In-memory `SyncStore` backend.
//!
//! All tables live behind one `std::sync::Mutex`, so every trait method is
//! trivially atomic. The lock is never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::error::StorageError;
use crate::record::{
    DeclarationRecord, DeclarationStats, DeclarationSummaryRecord, ExchangeRateRecord, JobCounter,
    JobStatus, JobTransition, LockRecord, NewDeclaration, NewOperationLog, NewSyncJob,
    NewSyncJobError, OperationLogFinish, OperationLogRecord, OperationStatus, RateRow,
    RateUpsertCounts, SavedDeclaration, SyncJobErrorRecord, SyncJobRecord, UpsertOutcome,
};
use crate::traits::SyncStore;

#[derive(Default)]
struct Tables {
    locks: BTreeMap<String, LockRecord>,
    logs: BTreeMap<i64, OperationLogRecord>,
    rates: BTreeMap<(Date, String), ExchangeRateRecord>,
    declarations: BTreeMap<i64, DeclarationRecord>,
    declaration_keys: BTreeMap<(i64, String), i64>,
    summaries: BTreeMap<i64, DeclarationSummaryRecord>,
    jobs: BTreeMap<i64, SyncJobRecord>,
    job_errors: BTreeMap<i64, SyncJobErrorRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn job_mut(&mut self, id: i64) -> Result<&mut SyncJobRecord, StorageError> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("sync_jobs", id))
    }
}

/// `SyncStore` backed by process memory. Used by tests and the `memory`
/// database URL.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store lock poisoned: {e}")))
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn insert_lock(
        &self,
        lock: &LockRecord,
        now: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let mut t = self.tables()?;
        if let Some(existing) = t.locks.get(&lock.scope_key) {
            if !existing.is_expired(now) {
                return Err(StorageError::duplicate("operation_locks", &lock.scope_key));
            }
            t.locks.remove(&lock.scope_key);
        }
        t.locks.insert(lock.scope_key.clone(), lock.clone());
        Ok(())
    }

    async fn delete_lock(&self, scope_key: &str) -> Result<bool, StorageError> {
        Ok(self.tables()?.locks.remove(scope_key).is_some())
    }

    async fn get_lock(&self, scope_key: &str) -> Result<Option<LockRecord>, StorageError> {
        Ok(self.tables()?.locks.get(scope_key).cloned())
    }

    async fn insert_operation_log(&self, entry: &NewOperationLog) -> Result<i64, StorageError> {
        let mut t = self.tables()?;
        let id = t.next_id();
        t.logs.insert(
            id,
            OperationLogRecord {
                id,
                operation: entry.operation.clone(),
                status: OperationStatus::Started,
                company_id: entry.company_id,
                user_id: entry.user_id,
                meta: entry.meta.clone(),
                details: None,
                started_at: entry.started_at,
                finished_at: None,
                duration_ms: None,
            },
        );
        Ok(id)
    }

    async fn get_operation_log(&self, id: i64) -> Result<OperationLogRecord, StorageError> {
        self.tables()?
            .logs
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("operation_logs", id))
    }

    async fn finish_operation_log(
        &self,
        id: i64,
        finish: &OperationLogFinish,
    ) -> Result<(), StorageError> {
        let mut t = self.tables()?;
        let entry = t
            .logs
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("operation_logs", id))?;
        if entry.status.is_terminal() {
            return Err(StorageError::AlreadyFinished { log_id: id });
        }
        entry.status = finish.status;
        entry.details = finish.details.clone();
        if let Some(meta) = &finish.meta {
            entry.meta = meta.clone();
        }
        entry.finished_at = Some(finish.finished_at);
        entry.duration_ms = Some(finish.duration_ms);
        Ok(())
    }

    async fn list_operation_logs(
        &self,
        operation: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OperationLogRecord>, StorageError> {
        let t = self.tables()?;
        Ok(t.logs
            .values()
            .rev()
            .filter(|l| operation.map_or(true, |op| l.operation == op))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_exchange_rates(
        &self,
        date: Date,
        rows: &[RateRow],
        now: OffsetDateTime,
    ) -> Result<RateUpsertCounts, StorageError> {
        let mut t = self.tables()?;
        let mut counts = RateUpsertCounts::default();
        for row in rows {
            let key = (date, row.currency_code.clone());
            match t.rates.get_mut(&key) {
                Some(existing) => {
                    if existing.rate == row.rate && existing.currency_name == row.currency_name {
                        counts.unchanged += 1;
                    } else {
                        counts.updated += 1;
                    }
                    existing.rate = row.rate;
                    existing.currency_name = row.currency_name.clone();
                    existing.updated_at = now;
                }
                None => {
                    counts.inserted += 1;
                    t.rates.insert(
                        key,
                        ExchangeRateRecord {
                            date,
                            currency_code: row.currency_code.clone(),
                            currency_name: row.currency_name.clone(),
                            rate: row.rate,
                            updated_at: now,
                        },
                    );
                }
            }
        }
        Ok(counts)
    }

    async fn count_exchange_rates(&self, date: Date) -> Result<u64, StorageError> {
        let t = self.tables()?;
        Ok(t.rates.keys().filter(|(d, _)| *d == date).count() as u64)
    }

    async fn list_exchange_rates(
        &self,
        date: Date,
    ) -> Result<Vec<ExchangeRateRecord>, StorageError> {
        let t = self.tables()?;
        Ok(t.rates
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect())
    }

    async fn save_declaration(
        &self,
        declaration: &NewDeclaration,
        now: OffsetDateTime,
    ) -> Result<SavedDeclaration, StorageError> {
        let mut t = self.tables()?;
        let key = (declaration.company_id, declaration.customs_id.clone());
        if let Some(&id) = t.declaration_keys.get(&key) {
            return Ok(SavedDeclaration {
                id,
                inserted: false,
            });
        }
        let id = t.next_id();
        t.declaration_keys.insert(key, id);
        t.declarations.insert(
            id,
            DeclarationRecord {
                id,
                company_id: declaration.company_id,
                customs_id: declaration.customs_id.clone(),
                mrn: declaration.mrn.clone(),
                status: declaration.status.clone(),
                date: declaration.date,
                xml_data: declaration.xml_data.clone(),
                created_at: now,
            },
        );
        Ok(SavedDeclaration { id, inserted: true })
    }

    async fn get_declaration(&self, id: i64) -> Result<DeclarationRecord, StorageError> {
        self.tables()?
            .declarations
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("declarations", id))
    }

    async fn list_declarations_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeclarationRecord>, StorageError> {
        let t = self.tables()?;
        let start = cursor.map_or(i64::MIN, |c| c.saturating_add(1));
        Ok(t.declarations
            .range(start..)
            .take(limit)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn upsert_declaration_summary(
        &self,
        summary: &DeclarationSummaryRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        let mut t = self.tables()?;
        let outcome = match t.summaries.get(&summary.declaration_id) {
            Some(existing) if existing.same_content(summary) => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        t.summaries.insert(summary.declaration_id, summary.clone());
        Ok(outcome)
    }

    async fn get_declaration_summary(
        &self,
        declaration_id: i64,
    ) -> Result<Option<DeclarationSummaryRecord>, StorageError> {
        Ok(self.tables()?.summaries.get(&declaration_id).cloned())
    }

    async fn declaration_stats(&self, company_id: i64) -> Result<DeclarationStats, StorageError> {
        let t = self.tables()?;
        let mut stats = DeclarationStats::default();
        for d in t.declarations.values().filter(|d| d.company_id == company_id) {
            stats.total += 1;
            if t.summaries.contains_key(&d.id) {
                stats.with_summary += 1;
            }
            let status = d.status.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.by_status.entry(status).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn insert_sync_job(&self, job: &NewSyncJob) -> Result<SyncJobRecord, StorageError> {
        let mut t = self.tables()?;
        let id = t.next_id();
        let record = SyncJobRecord {
            id,
            company_id: job.company_id,
            status: JobStatus::Processing,
            date_from: job.date_from,
            date_to: job.date_to,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            total_guids: 0,
            completed: 0,
            error_message: None,
            cancelled_at: None,
            created_at: job.created_at,
            updated_at: job.created_at,
            finished_at: None,
        };
        t.jobs.insert(id, record.clone());
        Ok(record)
    }

    async fn get_sync_job(&self, id: i64) -> Result<SyncJobRecord, StorageError> {
        self.tables()?
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("sync_jobs", id))
    }

    async fn set_sync_job_totals(
        &self,
        id: i64,
        total_chunks: Option<i64>,
        total_guids: Option<i64>,
        now: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let mut t = self.tables()?;
        let job = t.job_mut(id)?;
        if let Some(n) = total_chunks {
            job.total_chunks = n;
        }
        if let Some(n) = total_guids {
            job.total_guids = n;
        }
        job.updated_at = now;
        Ok(())
    }

    async fn increment_sync_job(
        &self,
        id: i64,
        counter: JobCounter,
        now: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        let mut t = self.tables()?;
        let job = t.job_mut(id)?;
        let slot = match counter {
            JobCounter::CompletedChunks => &mut job.completed_chunks,
            JobCounter::FailedChunks => &mut job.failed_chunks,
            JobCounter::CompletedGuids => &mut job.completed,
        };
        *slot += 1;
        let value = *slot;
        job.updated_at = now;
        Ok(value)
    }

    async fn transition_sync_job(
        &self,
        id: i64,
        transition: &JobTransition,
    ) -> Result<SyncJobRecord, StorageError> {
        let mut t = self.tables()?;
        let job = t.job_mut(id)?;
        if job.status != JobStatus::Processing || !transition.to.is_terminal() {
            return Err(StorageError::InvalidTransition {
                job_id: id,
                from: job.status.to_string(),
                to: transition.to.to_string(),
            });
        }
        job.status = transition.to;
        if transition.error_message.is_some() {
            job.error_message = transition.error_message.clone();
        }
        if transition.to == JobStatus::Cancelled {
            job.cancelled_at = Some(transition.at);
        }
        job.finished_at = Some(transition.at);
        job.updated_at = transition.at;
        Ok(job.clone())
    }

    async fn insert_sync_job_error(&self, error: &NewSyncJobError) -> Result<i64, StorageError> {
        let mut t = self.tables()?;
        if !t.jobs.contains_key(&error.sync_job_id) {
            return Err(StorageError::not_found("sync_jobs", error.sync_job_id));
        }
        let id = t.next_id();
        t.job_errors.insert(
            id,
            SyncJobErrorRecord {
                id,
                sync_job_id: error.sync_job_id,
                chunk_number: error.chunk_number,
                date_from: error.date_from,
                date_to: error.date_to,
                error_message: error.error_message.clone(),
                error_code: error.error_code.clone(),
                retry_attempts: error.retry_attempts,
                is_retried: false,
                created_at: error.created_at,
            },
        );
        Ok(id)
    }

    async fn list_sync_job_errors(
        &self,
        sync_job_id: i64,
    ) -> Result<Vec<SyncJobErrorRecord>, StorageError> {
        let t = self.tables()?;
        Ok(t.job_errors
            .values()
            .filter(|e| e.sync_job_id == sync_job_id)
            .cloned()
            .collect())
    }

    async fn mark_sync_job_errors_retried(
        &self,
        sync_job_id: i64,
        chunk_number: i64,
    ) -> Result<u64, StorageError> {
        let mut t = self.tables()?;
        let mut changed = 0;
        for e in t.job_errors.values_mut() {
            if e.sync_job_id == sync_job_id && e.chunk_number == chunk_number && !e.is_retried {
                e.is_retried = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_store_passes_conformance() {
        let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
        assert!(report.failed == 0, "{report}");
    }
}
