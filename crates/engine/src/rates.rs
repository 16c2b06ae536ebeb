//! Exchange-rate synchronization.
//!
//! Both modes walk a day range in ascending order, one external call per
//! day, and upsert each returned table keyed by `(date, currency_code)`:
//!
//! - **full**: every day of the last `backfill_years` years.
//! - **daily**: the last `gap_fill_days` days, skipping any day that already
//!   has at least one stored row. A partially stored day is therefore never
//!   repaired by gap-fill; run a full backfill or the audit with repair.
//!
//! A failing day is logged and counted; the loop always finishes the range.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use customs_sync_storage::{OperationStatus, SyncStore};
use serde::Serialize;
use serde_json::json;
use time::Date;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::lock::{LockRequest, OperationLock, Scoped, SCOPE_RATES_DAILY, SCOPE_RATES_FULL};
use crate::oplog::{LogScope, OperationLog};
use crate::period::{format_day, split, utc_day, years_before, Period, RATE_CHUNK_DAYS};
use crate::source::RateSource;
use crate::SyncOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSyncMode {
    Full,
    Daily,
}

impl RateSyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSyncMode::Full => "full",
            RateSyncMode::Daily => "daily",
        }
    }

    pub fn scope_key(&self) -> &'static str {
        match self {
            RateSyncMode::Full => SCOPE_RATES_FULL,
            RateSyncMode::Daily => SCOPE_RATES_DAILY,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            RateSyncMode::Full => "rates.full",
            RateSyncMode::Daily => "rates.daily",
        }
    }
}

impl fmt::Display for RateSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateSyncMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(RateSyncMode::Full),
            "daily" => Ok(RateSyncMode::Daily),
            other => Err(EngineError::InvalidInput(format!(
                "unknown sync type '{other}' (expected full or daily)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateSyncConfig {
    pub backfill_years: u32,
    pub gap_fill_days: u32,
    /// Pause between two consecutive external calls.
    pub request_delay: Duration,
    pub lock_ttl: Duration,
}

impl Default for RateSyncConfig {
    fn default() -> Self {
        Self {
            backfill_years: 5,
            gap_fill_days: 30,
            request_delay: Duration::from_millis(100),
            lock_ttl: Duration::from_secs(3600),
        }
    }
}

/// Counts for one run. `days_total` equals the sum of the four day outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSyncReport {
    pub days_total: u64,
    /// Days whose table was fetched and upserted.
    pub days_processed: u64,
    /// Days skipped by gap-fill because rows already existed.
    pub days_skipped: u64,
    /// Days the source had no data for, was unreachable, or answered
    /// with an unreadable body.
    pub days_missed: u64,
    /// Days whose stored state could not be read or written.
    pub days_failed: u64,
    pub rows_synced: u64,
}

/// Reported after every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateProgress {
    pub date: Date,
    pub done: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    Synced { rows: u64 },
    Skipped,
    Missed,
}

pub struct ExchangeRateSyncer {
    store: Arc<dyn SyncStore>,
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    lock: OperationLock,
    oplog: OperationLog,
    config: RateSyncConfig,
}

impl ExchangeRateSyncer {
    pub fn new(
        store: Arc<dyn SyncStore>,
        source: Arc<dyn RateSource>,
        clock: Arc<dyn Clock>,
        config: RateSyncConfig,
    ) -> Self {
        Self {
            lock: OperationLock::new(store.clone(), clock.clone()),
            oplog: OperationLog::new(store.clone(), clock.clone()),
            store,
            source,
            clock,
            config,
        }
    }

    /// The day range a mode covers, ending today (UTC).
    pub fn range_for(&self, mode: RateSyncMode) -> Period {
        let today = utc_day(self.clock.now());
        let start = match mode {
            RateSyncMode::Full => years_before(today, self.config.backfill_years),
            RateSyncMode::Daily => today
                .checked_sub(time::Duration::days(i64::from(self.config.gap_fill_days)))
                .unwrap_or(today),
        };
        Period::new(start, today)
    }

    /// Run a mode under its `SYNC:<mode>` lock with an operation log entry.
    pub async fn run(
        &self,
        mode: RateSyncMode,
        progress: &(dyn Fn(&RateProgress) + Send + Sync),
    ) -> Result<SyncOutcome<RateSyncReport>, EngineError> {
        let range = self.range_for(mode);
        let request = LockRequest::new(mode.scope_key(), mode.operation(), self.config.lock_ttl);
        let meta = json!({
            "mode": mode.as_str(),
            "from": format_day(range.start),
            "to": format_day(range.end),
        });

        let scoped = self
            .lock
            .scoped(&request, self.logged_run(mode, range, progress, meta.clone()))
            .await?;
        match scoped {
            Scoped::Ran(result) => result.map(SyncOutcome::Completed),
            Scoped::Locked => {
                self.oplog
                    .record_blocked(mode.operation(), LogScope::default(), meta)
                    .await;
                Ok(SyncOutcome::Locked)
            }
        }
    }

    async fn logged_run(
        &self,
        mode: RateSyncMode,
        range: Period,
        progress: &(dyn Fn(&RateProgress) + Send + Sync),
        meta: serde_json::Value,
    ) -> Result<RateSyncReport, EngineError> {
        let log_id = self
            .oplog
            .start_quietly(mode.operation(), LogScope::default(), meta)
            .await;
        tracing::info!(%mode, from = %range.start, to = %range.end, "rate sync started");

        let report = self
            .sync_range(range, mode == RateSyncMode::Daily, progress)
            .await;

        tracing::info!(
            %mode,
            days = report.days_total,
            processed = report.days_processed,
            skipped = report.days_skipped,
            missed = report.days_missed,
            failed = report.days_failed,
            rows = report.rows_synced,
            "rate sync finished"
        );
        let status = if report.days_failed > 0 && report.days_failed == report.days_total {
            OperationStatus::Error
        } else {
            OperationStatus::Success
        };
        let details = (report.days_failed > 0)
            .then(|| format!("{} day(s) failed", report.days_failed));
        self.oplog
            .finish_quietly(log_id, status, details, Some(json!({ "report": report })))
            .await;
        Ok(report)
    }

    /// Walk `range` day by day. With `skip_populated`, days that already have
    /// any stored row are not fetched.
    pub async fn sync_range(
        &self,
        range: Period,
        skip_populated: bool,
        progress: &(dyn Fn(&RateProgress) + Send + Sync),
    ) -> RateSyncReport {
        let chunks = split(range.start, range.end, RATE_CHUNK_DAYS);
        let mut report = RateSyncReport {
            days_total: range.day_count() as u64,
            ..RateSyncReport::default()
        };
        let mut fetched_before = false;
        let mut done = 0u64;

        for chunk in chunks {
            for date in chunk.days() {
                match self.sync_day(date, skip_populated, &mut fetched_before).await {
                    Ok(DayOutcome::Synced { rows }) => {
                        report.days_processed += 1;
                        report.rows_synced += rows;
                    }
                    Ok(DayOutcome::Skipped) => report.days_skipped += 1,
                    Ok(DayOutcome::Missed) => {
                        tracing::warn!(date = %date, "no rates published");
                        report.days_missed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(date = %date, error = %e, "rate day failed");
                        report.days_failed += 1;
                    }
                }
                done += 1;
                tracing::debug!(date = %date, done, total = report.days_total, "rate day done");
                progress(&RateProgress {
                    date,
                    done,
                    total: report.days_total,
                });
            }
        }
        report
    }

    async fn sync_day(
        &self,
        date: Date,
        skip_populated: bool,
        fetched_before: &mut bool,
    ) -> Result<DayOutcome, EngineError> {
        if skip_populated && self.store.count_exchange_rates(date).await? > 0 {
            return Ok(DayOutcome::Skipped);
        }

        if *fetched_before && !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
        *fetched_before = true;

        // An unreachable source or an unreadable body is a miss, like an
        // empty table. Only store failures count as failed days.
        let rows = match self.source.fetch_day(date, None).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(date = %date, error = %e, "rate source unavailable");
                return Ok(DayOutcome::Missed);
            }
        };
        if rows.is_empty() {
            return Ok(DayOutcome::Missed);
        }

        let counts = self
            .store
            .upsert_exchange_rates(date, &rows, self.clock.now())
            .await?;
        tracing::debug!(
            date = %date,
            inserted = counts.inserted,
            updated = counts.updated,
            unchanged = counts.unchanged,
            "rates upserted"
        );
        Ok(DayOutcome::Synced {
            rows: counts.total(),
        })
    }
}
