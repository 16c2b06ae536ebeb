//! Declaration summaries: derivation and backfill.

use std::sync::Arc;
use std::time::Duration;

use customs_sync_storage::{
    DeclarationStats, DeclarationSummaryRecord, OperationStatus, StorageError, SyncStore,
    UpsertOutcome,
};
use serde::Serialize;
use serde_json::json;

use crate::cache::StatsCache;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::extract::extract_summary;
use crate::lock::{LockRequest, OperationLock, Scoped, SCOPE_SUMMARY_BACKFILL};
use crate::oplog::{LogScope, OperationLog};
use crate::scanner::{CursorScanner, DeclarationRows};
use crate::SyncOutcome;

pub const BACKFILL_OPERATION: &str = "summaries.backfill";

/// Re-derive a declaration's summary from its payload and upsert it.
///
/// Idempotent: the same payload yields `Unchanged` after the first call.
pub async fn update_declaration_summary(
    store: &dyn SyncStore,
    clock: &dyn Clock,
    declaration_id: i64,
    payload: &str,
) -> Result<UpsertOutcome, StorageError> {
    let extracted = extract_summary(payload);
    let record = DeclarationSummaryRecord {
        declaration_id,
        representative_name: extracted.parties.representative_name,
        carrier_name: extracted.parties.carrier_name,
        bank_name: extracted.parties.bank_name,
        customs_value: extracted.customs_value,
        hs_codes: extracted.hs_codes,
        goods_count: extracted.goods_count,
        updated_at: clock.now(),
    };
    store.upsert_declaration_summary(&record).await
}

/// Result of one backfill page, as returned to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillPage {
    pub processed: u64,
    pub updated: u64,
    pub next_cursor: Option<i64>,
    pub done: bool,
    pub batch_size: usize,
}

/// Totals of a backfill run over every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillTotals {
    pub pages: u64,
    pub processed: u64,
    pub updated: u64,
    pub last_cursor: Option<i64>,
}

pub struct SummaryBackfill {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    lock: OperationLock,
    oplog: OperationLog,
    lock_ttl: Duration,
    stats: Option<Arc<StatsCache<i64, DeclarationStats>>>,
}

impl SummaryBackfill {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>, lock_ttl: Duration) -> Self {
        Self {
            lock: OperationLock::new(store.clone(), clock.clone()),
            oplog: OperationLog::new(store.clone(), clock.clone()),
            store,
            clock,
            lock_ttl,
            stats: None,
        }
    }

    /// Invalidate a company's cached stats whenever one of its summaries
    /// is written.
    pub fn with_stats_cache(mut self, cache: Arc<StatsCache<i64, DeclarationStats>>) -> Self {
        self.stats = Some(cache);
        self
    }

    /// Process one page after `cursor`. `batch_size` is clamped to 1..=500.
    pub async fn page(
        &self,
        batch_size: usize,
        cursor: Option<i64>,
    ) -> Result<BackfillPage, EngineError> {
        let scanner = CursorScanner::new(DeclarationRows::new(self.store.clone()), batch_size);
        let page = scanner.scan(cursor).await?;

        let mut updated = 0u64;
        for row in &page.rows {
            let outcome = update_declaration_summary(
                self.store.as_ref(),
                self.clock.as_ref(),
                row.id,
                &row.xml_data,
            )
            .await?;
            if outcome.is_write() {
                updated += 1;
                if let Some(stats) = &self.stats {
                    stats.invalidate(&row.company_id);
                }
            }
        }

        let result = BackfillPage {
            processed: page.rows.len() as u64,
            updated,
            next_cursor: page.next_cursor,
            done: page.done,
            batch_size: scanner.batch_size(),
        };
        tracing::debug!(
            cursor = ?cursor,
            next_cursor = ?result.next_cursor,
            processed = result.processed,
            updated = result.updated,
            "summary backfill page"
        );
        Ok(result)
    }

    /// Drive pages from `cursor` until a short page, under the backfill lock.
    /// `on_page` sees every page as it completes.
    pub async fn run_to_completion(
        &self,
        batch_size: usize,
        cursor: Option<i64>,
        on_page: &(dyn Fn(&BackfillPage) + Send + Sync),
    ) -> Result<SyncOutcome<BackfillTotals>, EngineError> {
        let request = LockRequest::new(SCOPE_SUMMARY_BACKFILL, BACKFILL_OPERATION, self.lock_ttl);
        let meta = json!({ "batchSize": batch_size, "cursor": cursor });

        let scoped = self
            .lock
            .scoped(&request, self.logged_run(batch_size, cursor, on_page, meta.clone()))
            .await?;
        match scoped {
            Scoped::Ran(result) => result.map(SyncOutcome::Completed),
            Scoped::Locked => {
                self.oplog
                    .record_blocked(BACKFILL_OPERATION, LogScope::default(), meta)
                    .await;
                Ok(SyncOutcome::Locked)
            }
        }
    }

    async fn logged_run(
        &self,
        batch_size: usize,
        mut cursor: Option<i64>,
        on_page: &(dyn Fn(&BackfillPage) + Send + Sync),
        meta: serde_json::Value,
    ) -> Result<BackfillTotals, EngineError> {
        let log_id = self
            .oplog
            .start_quietly(BACKFILL_OPERATION, LogScope::default(), meta)
            .await;
        tracing::info!(batch_size, cursor = ?cursor, "summary backfill started");

        let mut totals = BackfillTotals {
            last_cursor: cursor,
            ..BackfillTotals::default()
        };
        let result = loop {
            match self.page(batch_size, cursor).await {
                Ok(page) => {
                    totals.pages += 1;
                    totals.processed += page.processed;
                    totals.updated += page.updated;
                    totals.last_cursor = page.next_cursor;
                    on_page(&page);
                    cursor = page.next_cursor;
                    if page.done {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    processed = totals.processed,
                    updated = totals.updated,
                    "summary backfill finished"
                );
                self.oplog
                    .finish_quietly(
                        log_id,
                        OperationStatus::Success,
                        None,
                        Some(json!({ "processed": totals.processed, "updated": totals.updated, "lastCursor": totals.last_cursor })),
                    )
                    .await;
                Ok(totals)
            }
            Err(e) => {
                tracing::error!(error = %e, cursor = ?totals.last_cursor, "summary backfill failed");
                self.oplog
                    .finish_quietly(
                        log_id,
                        OperationStatus::Error,
                        Some(e.to_string()),
                        Some(json!({ "lastCursor": totals.last_cursor })),
                    )
                    .await;
                Err(e)
            }
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
