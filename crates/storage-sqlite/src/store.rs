use std::collections::BTreeMap;

use async_trait::async_trait;
use customs_sync_storage::{
    DeclarationRecord, DeclarationStats, DeclarationSummaryRecord, ExchangeRateRecord, JobCounter,
    JobStatus, JobTransition, LockRecord, NewDeclaration, NewOperationLog, NewSyncJob,
    NewSyncJobError, OperationLogFinish, OperationLogRecord, OperationStatus, RateRow,
    RateUpsertCounts, SavedDeclaration, StorageError, SyncJobErrorRecord, SyncJobRecord,
    SyncStore, UpsertOutcome,
};
use sqlx::Row;
use time::{Date, OffsetDateTime};

use crate::convert::{
    backend, day, declaration_row, from_decimal, is_unique_violation, job_error_row, job_row,
    lock_row, log_row, rate_row, summary_row, ts,
};
use crate::SqliteStore;

#[async_trait]
impl SyncStore for SqliteStore {
    // ── Operation locks ──────────────────────────────────────────────────────

    async fn insert_lock(
        &self,
        lock: &LockRecord,
        now: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let purged = sqlx::query("DELETE FROM operation_locks WHERE scope_key = ? AND expires_at <= ?")
            .bind(&lock.scope_key)
            .bind(ts(now))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if purged.rows_affected() > 0 {
            tracing::debug!(scope = %lock.scope_key, "purged expired lock");
        }

        let inserted = sqlx::query(
            "INSERT INTO operation_locks (scope_key, operation, company_id, user_id, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&lock.scope_key)
        .bind(&lock.operation)
        .bind(lock.company_id)
        .bind(lock.user_id)
        .bind(ts(lock.expires_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(backend)?;
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.map_err(backend)?;
                Err(StorageError::duplicate("operation_locks", &lock.scope_key))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete_lock(&self, scope_key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM operation_locks WHERE scope_key = ?")
            .bind(scope_key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lock(&self, scope_key: &str) -> Result<Option<LockRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM operation_locks WHERE scope_key = ?")
            .bind(scope_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(lock_row).transpose()
    }

    // ── Operation log ────────────────────────────────────────────────────────

    async fn insert_operation_log(&self, entry: &NewOperationLog) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO operation_logs (operation, status, company_id, user_id, meta, started_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.operation)
        .bind(OperationStatus::Started.as_str())
        .bind(entry.company_id)
        .bind(entry.user_id)
        .bind(entry.meta.to_string())
        .bind(ts(entry.started_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.last_insert_rowid())
    }

    async fn get_operation_log(&self, id: i64) -> Result<OperationLogRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM operation_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("operation_logs", id))?;
        log_row(&row)
    }

    async fn finish_operation_log(
        &self,
        id: i64,
        finish: &OperationLogFinish,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE operation_logs
               SET status = ?, details = ?, meta = COALESCE(?, meta),
                   finished_at = ?, duration_ms = ?
             WHERE id = ? AND status = 'started'
            "#,
        )
        .bind(finish.status.as_str())
        .bind(&finish.details)
        .bind(finish.meta.as_ref().map(|m| m.to_string()))
        .bind(ts(finish.finished_at))
        .bind(finish.duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            // Distinguish "no such entry" from "already terminal".
            self.get_operation_log(id).await?;
            return Err(StorageError::AlreadyFinished { log_id: id });
        }
        Ok(())
    }

    async fn list_operation_logs(
        &self,
        operation: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OperationLogRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM operation_logs WHERE (?1 IS NULL OR operation = ?1) ORDER BY id DESC LIMIT ?2",
        )
        .bind(operation)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(log_row).collect()
    }

    // ── Exchange rates ───────────────────────────────────────────────────────

    async fn upsert_exchange_rates(
        &self,
        date: Date,
        rows: &[RateRow],
        now: OffsetDateTime,
    ) -> Result<RateUpsertCounts, StorageError> {
        let day_key = day(date);
        let mut counts = RateUpsertCounts::default();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for row in rows {
            let existing = sqlx::query(
                "SELECT rate, currency_name FROM exchange_rates WHERE date = ? AND currency_code = ?",
            )
            .bind(&day_key)
            .bind(&row.currency_code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            match existing {
                Some(stored) => {
                    let stored_rate: String = stored.try_get("rate").map_err(backend)?;
                    let stored_name: String = stored.try_get("currency_name").map_err(backend)?;
                    if from_decimal(&stored_rate)? == row.rate && stored_name == row.currency_name {
                        counts.unchanged += 1;
                    } else {
                        counts.updated += 1;
                    }
                    sqlx::query(
                        "UPDATE exchange_rates SET rate = ?, currency_name = ?, updated_at = ? WHERE date = ? AND currency_code = ?",
                    )
                    .bind(row.rate.to_string())
                    .bind(&row.currency_name)
                    .bind(ts(now))
                    .bind(&day_key)
                    .bind(&row.currency_code)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                }
                None => {
                    counts.inserted += 1;
                    sqlx::query(
                        "INSERT INTO exchange_rates (date, currency_code, currency_name, rate, updated_at) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(&day_key)
                    .bind(&row.currency_code)
                    .bind(&row.currency_name)
                    .bind(row.rate.to_string())
                    .bind(ts(now))
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                }
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(counts)
    }

    async fn count_exchange_rates(&self, date: Date) -> Result<u64, StorageError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchange_rates WHERE date = ?")
            .bind(day(date))
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n as u64)
    }

    async fn list_exchange_rates(
        &self,
        date: Date,
    ) -> Result<Vec<ExchangeRateRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM exchange_rates WHERE date = ? ORDER BY currency_code")
            .bind(day(date))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(rate_row).collect()
    }

    // ── Declarations ─────────────────────────────────────────────────────────

    async fn save_declaration(
        &self,
        declaration: &NewDeclaration,
        now: OffsetDateTime,
    ) -> Result<SavedDeclaration, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO declarations (company_id, customs_id, mrn, status, date, xml_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (company_id, customs_id) DO NOTHING
            "#,
        )
        .bind(declaration.company_id)
        .bind(&declaration.customs_id)
        .bind(&declaration.mrn)
        .bind(&declaration.status)
        .bind(declaration.date.map(day))
        .bind(&declaration.xml_data)
        .bind(ts(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() > 0 {
            return Ok(SavedDeclaration {
                id: result.last_insert_rowid(),
                inserted: true,
            });
        }

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM declarations WHERE company_id = ? AND customs_id = ?",
        )
        .bind(declaration.company_id)
        .bind(&declaration.customs_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(SavedDeclaration {
            id,
            inserted: false,
        })
    }

    async fn get_declaration(&self, id: i64) -> Result<DeclarationRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM declarations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("declarations", id))?;
        declaration_row(&row)
    }

    async fn list_declarations_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeclarationRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM declarations WHERE id > ? ORDER BY id ASC LIMIT ?")
            .bind(cursor.unwrap_or(i64::MIN))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(declaration_row).collect()
    }

    async fn upsert_declaration_summary(
        &self,
        summary: &DeclarationSummaryRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing =
            sqlx::query("SELECT * FROM declaration_summaries WHERE declaration_id = ?")
                .bind(summary.declaration_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        let outcome = match existing.as_ref().map(summary_row).transpose()? {
            Some(stored) if stored.same_content(summary) => {
                tx.rollback().await.map_err(backend)?;
                return Ok(UpsertOutcome::Unchanged);
            }
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        let hs_codes = serde_json::to_string(&summary.hs_codes)
            .map_err(|e| StorageError::Backend(format!("encode hs_codes: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO declaration_summaries (
                declaration_id, representative_name, carrier_name, bank_name,
                customs_value, hs_codes, goods_count, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (declaration_id) DO UPDATE SET
                representative_name = excluded.representative_name,
                carrier_name = excluded.carrier_name,
                bank_name = excluded.bank_name,
                customs_value = excluded.customs_value,
                hs_codes = excluded.hs_codes,
                goods_count = excluded.goods_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(summary.declaration_id)
        .bind(&summary.representative_name)
        .bind(&summary.carrier_name)
        .bind(&summary.bank_name)
        .bind(summary.customs_value.map(|v| v.to_string()))
        .bind(hs_codes)
        .bind(summary.goods_count)
        .bind(ts(summary.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(outcome)
    }

    async fn get_declaration_summary(
        &self,
        declaration_id: i64,
    ) -> Result<Option<DeclarationSummaryRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM declaration_summaries WHERE declaration_id = ?")
            .bind(declaration_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(summary_row).transpose()
    }

    async fn declaration_stats(&self, company_id: i64) -> Result<DeclarationStats, StorageError> {
        let rows = sqlx::query(
            "SELECT COALESCE(status, 'unknown') AS status, COUNT(*) AS n FROM declarations WHERE company_id = ? GROUP BY 1",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut by_status = BTreeMap::new();
        let mut total = 0u64;
        for row in &rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let n: i64 = row.try_get("n").map_err(backend)?;
            total += n as u64;
            by_status.insert(status, n as u64);
        }

        let with_summary: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM declarations d
              JOIN declaration_summaries s ON s.declaration_id = d.id
             WHERE d.company_id = ?
            "#,
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(DeclarationStats {
            total,
            with_summary: with_summary as u64,
            by_status,
        })
    }

    // ── Sync jobs ────────────────────────────────────────────────────────────

    async fn insert_sync_job(&self, job: &NewSyncJob) -> Result<SyncJobRecord, StorageError> {
        let result = sqlx::query(
            "INSERT INTO sync_jobs (company_id, status, date_from, date_to, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(job.company_id)
        .bind(JobStatus::Processing.as_str())
        .bind(day(job.date_from))
        .bind(day(job.date_to))
        .bind(ts(job.created_at))
        .bind(ts(job.created_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.get_sync_job(result.last_insert_rowid()).await
    }

    async fn get_sync_job(&self, id: i64) -> Result<SyncJobRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("sync_jobs", id))?;
        job_row(&row)
    }

    async fn set_sync_job_totals(
        &self,
        id: i64,
        total_chunks: Option<i64>,
        total_guids: Option<i64>,
        now: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
               SET total_chunks = COALESCE(?, total_chunks),
                   total_guids = COALESCE(?, total_guids),
                   updated_at = ?
             WHERE id = ?
            "#,
        )
        .bind(total_chunks)
        .bind(total_guids)
        .bind(ts(now))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("sync_jobs", id));
        }
        Ok(())
    }

    async fn increment_sync_job(
        &self,
        id: i64,
        counter: JobCounter,
        now: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        let column = counter.column();
        let sql = format!(
            "UPDATE sync_jobs SET {column} = {column} + 1, updated_at = ? WHERE id = ? RETURNING {column}"
        );
        let value: Option<i64> = sqlx::query_scalar(&sql)
            .bind(ts(now))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        value.ok_or_else(|| StorageError::not_found("sync_jobs", id))
    }

    async fn transition_sync_job(
        &self,
        id: i64,
        transition: &JobTransition,
    ) -> Result<SyncJobRecord, StorageError> {
        if !transition.to.is_terminal() {
            let current = self.get_sync_job(id).await?;
            return Err(StorageError::InvalidTransition {
                job_id: id,
                from: current.status.to_string(),
                to: transition.to.to_string(),
            });
        }

        let at = ts(transition.at);
        let cancelled_at = (transition.to == JobStatus::Cancelled).then_some(at);
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
               SET status = ?,
                   error_message = COALESCE(?, error_message),
                   cancelled_at = COALESCE(?, cancelled_at),
                   finished_at = ?,
                   updated_at = ?
             WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(transition.to.as_str())
        .bind(&transition.error_message)
        .bind(cancelled_at)
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let current = self.get_sync_job(id).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidTransition {
                job_id: id,
                from: current.status.to_string(),
                to: transition.to.to_string(),
            });
        }
        Ok(current)
    }

    async fn insert_sync_job_error(&self, error: &NewSyncJobError) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_job_errors (
                sync_job_id, chunk_number, date_from, date_to, error_message,
                error_code, retry_attempts, is_retried, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(error.sync_job_id)
        .bind(error.chunk_number)
        .bind(day(error.date_from))
        .bind(day(error.date_to))
        .bind(&error.error_message)
        .bind(&error.error_code)
        .bind(error.retry_attempts)
        .bind(ts(error.created_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.last_insert_rowid())
    }

    async fn list_sync_job_errors(
        &self,
        sync_job_id: i64,
    ) -> Result<Vec<SyncJobErrorRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM sync_job_errors WHERE sync_job_id = ? ORDER BY id")
            .bind(sync_job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(job_error_row).collect()
    }

    async fn mark_sync_job_errors_retried(
        &self,
        sync_job_id: i64,
        chunk_number: i64,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE sync_job_errors SET is_retried = 1 WHERE sync_job_id = ? AND chunk_number = ? AND is_retried = 0",
        )
        .bind(sync_job_id)
        .bind(chunk_number)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
