//! Exchange-rate audit: compare stored rates with the source, day by day,
//! optionally repairing mismatching days.
//!
//! Events are sent over a channel as they happen so a caller can stream
//! them (NDJSON over HTTP, lines on stdout). If the receiver goes away the
//! audit stops with [`EngineError::Cancelled`].

use std::collections::BTreeMap;
use std::sync::Arc;

use customs_sync_storage::SyncStore;
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::period::{split, Period, AUDIT_CHUNK_DAYS};
use crate::source::RateSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuditEvent {
    Start {
        from: Date,
        to: Date,
        days: u64,
    },
    Progress {
        date: Date,
        done: u64,
        total: u64,
    },
    Mismatch {
        date: Date,
        currency: String,
        /// `None` when the currency is missing from the store.
        stored: Option<Decimal>,
        source: Decimal,
    },
    Error {
        date: Date,
        message: String,
    },
    Done {
        days: u64,
        mismatches: u64,
        repaired: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub days: u64,
    pub mismatches: u64,
    /// Rows rewritten from the source.
    pub repaired: u64,
    pub errors: u64,
}

pub struct RateAudit {
    store: Arc<dyn SyncStore>,
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
}

impl RateAudit {
    pub fn new(store: Arc<dyn SyncStore>, source: Arc<dyn RateSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    pub async fn run(
        &self,
        from: Date,
        to: Date,
        repair: bool,
        events: mpsc::Sender<AuditEvent>,
    ) -> Result<AuditSummary, EngineError> {
        let range = Period::new(from, to);
        let total = range.day_count() as u64;
        let mut summary = AuditSummary::default();

        emit(
            &events,
            AuditEvent::Start {
                from: range.start,
                to: range.end,
                days: total,
            },
        )
        .await?;
        tracing::info!(from = %range.start, to = %range.end, repair, "rate audit started");

        for chunk in split(range.start, range.end, AUDIT_CHUNK_DAYS) {
            for date in chunk.days() {
                self.audit_day(date, repair, &events, &mut summary).await?;
                summary.days += 1;
                emit(
                    &events,
                    AuditEvent::Progress {
                        date,
                        done: summary.days,
                        total,
                    },
                )
                .await?;
            }
        }

        emit(
            &events,
            AuditEvent::Done {
                days: summary.days,
                mismatches: summary.mismatches,
                repaired: summary.repaired,
            },
        )
        .await?;
        tracing::info!(
            days = summary.days,
            mismatches = summary.mismatches,
            repaired = summary.repaired,
            errors = summary.errors,
            "rate audit finished"
        );
        Ok(summary)
    }

    /// Day-level failures become `error` events; only a closed channel
    /// ends the audit.
    async fn audit_day(
        &self,
        date: Date,
        repair: bool,
        events: &mpsc::Sender<AuditEvent>,
        summary: &mut AuditSummary,
    ) -> Result<(), EngineError> {
        let source_rows = match self.source.fetch_day(date, None).await {
            Ok(rows) if rows.is_empty() => {
                return self
                    .day_error(events, summary, date, "no data from source".to_string())
                    .await;
            }
            Ok(rows) => rows,
            Err(e) => return self.day_error(events, summary, date, e.to_string()).await,
        };

        let stored: BTreeMap<String, Decimal> = match self.store.list_exchange_rates(date).await {
            Ok(rows) => rows
                .into_iter()
                .map(|r| (r.currency_code, r.rate))
                .collect(),
            Err(e) => return self.day_error(events, summary, date, e.to_string()).await,
        };

        let mut day_mismatches = 0u64;
        for row in &source_rows {
            let stored_rate = stored.get(&row.currency_code).copied();
            if stored_rate == Some(row.rate) {
                continue;
            }
            day_mismatches += 1;
            tracing::debug!(date = %date, currency = %row.currency_code, "rate mismatch");
            emit(
                events,
                AuditEvent::Mismatch {
                    date,
                    currency: row.currency_code.clone(),
                    stored: stored_rate,
                    source: row.rate,
                },
            )
            .await?;
        }
        summary.mismatches += day_mismatches;

        if repair && day_mismatches > 0 {
            match self
                .store
                .upsert_exchange_rates(date, &source_rows, self.clock.now())
                .await
            {
                Ok(_) => summary.repaired += day_mismatches,
                Err(e) => {
                    return self
                        .day_error(events, summary, date, format!("repair failed: {e}"))
                        .await
                }
            }
        }
        Ok(())
    }

    async fn day_error(
        &self,
        events: &mpsc::Sender<AuditEvent>,
        summary: &mut AuditSummary,
        date: Date,
        message: String,
    ) -> Result<(), EngineError> {
        tracing::warn!(date = %date, error = %message, "rate audit day failed");
        summary.errors += 1;
        emit(events, AuditEvent::Error { date, message }).await
    }
}

async fn emit(events: &mpsc::Sender<AuditEvent>, event: AuditEvent) -> Result<(), EngineError> {
    events.send(event).await.map_err(|_| EngineError::Cancelled)
}
