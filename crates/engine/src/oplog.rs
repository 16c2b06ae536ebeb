//! Append-only audit trail of attempted operations.
//!
//! Each entry is created `started` and finished exactly once. The log is
//! observational: failures to write it are logged and never change the
//! outcome of the operation being recorded.

use std::sync::Arc;

use customs_sync_storage::{
    NewOperationLog, OperationLogFinish, OperationStatus, StorageError, SyncStore,
};
use serde_json::Value;

use crate::clock::Clock;

/// Who an operation ran for.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScope {
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl LogScope {
    pub fn company(company_id: i64) -> Self {
        Self {
            company_id: Some(company_id),
            user_id: None,
        }
    }
}

pub struct OperationLog {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
}

impl OperationLog {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append a `started` entry and return its id.
    pub async fn start(
        &self,
        operation: &str,
        scope: LogScope,
        meta: Value,
    ) -> Result<i64, StorageError> {
        let id = self
            .store
            .insert_operation_log(&NewOperationLog {
                operation: operation.to_string(),
                company_id: scope.company_id,
                user_id: scope.user_id,
                meta,
                started_at: self.clock.now(),
            })
            .await?;
        tracing::debug!(log_id = id, operation, "operation started");
        Ok(id)
    }

    /// Write the terminal status. `meta` keys overwrite the start meta.
    pub async fn finish(
        &self,
        id: i64,
        status: OperationStatus,
        details: Option<String>,
        meta: Option<Value>,
    ) -> Result<(), StorageError> {
        let entry = self.store.get_operation_log(id).await?;
        let finished_at = self.clock.now();
        let duration_ms = (finished_at - entry.started_at).whole_milliseconds().max(0) as i64;

        let meta = meta.map(|extra| merge_meta(entry.meta, extra));
        self.store
            .finish_operation_log(
                id,
                &OperationLogFinish {
                    status,
                    details,
                    meta,
                    finished_at,
                    duration_ms,
                },
            )
            .await?;
        tracing::debug!(log_id = id, %status, duration_ms, "operation finished");
        Ok(())
    }

    /// [`start`](Self::start) that logs instead of failing. `None` means the
    /// entry could not be written.
    pub async fn start_quietly(&self, operation: &str, scope: LogScope, meta: Value) -> Option<i64> {
        match self.start(operation, scope, meta).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(operation, error = %e, "failed to write operation log");
                None
            }
        }
    }

    /// [`finish`](Self::finish) that logs instead of failing. A second finish
    /// of the same entry lands here as `AlreadyFinished`.
    pub async fn finish_quietly(
        &self,
        id: Option<i64>,
        status: OperationStatus,
        details: Option<String>,
        meta: Option<Value>,
    ) {
        let Some(id) = id else { return };
        if let Err(e) = self.finish(id, status, details, meta).await {
            tracing::warn!(log_id = id, error = %e, "failed to finish operation log");
        }
    }

    /// Record a run refused by a held lock as a `blocked` entry.
    pub async fn record_blocked(&self, operation: &str, scope: LogScope, meta: Value) {
        let id = self.start_quietly(operation, scope, meta).await;
        self.finish_quietly(
            id,
            OperationStatus::Blocked,
            Some("operation already in progress".to_string()),
            None,
        )
        .await;
    }
}

/// Object keys of `extra` overwrite those of `base`; a non-object `extra`
/// replaces `base` entirely.
fn merge_meta(base: Value, extra: Value) -> Value {
    match (base, extra) {
        (Value::Object(mut base), Value::Object(extra)) => {
            base.extend(extra);
            Value::Object(base)
        }
        (_, extra) => extra,
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use customs_sync_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use time::macros::datetime;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, OperationLog) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2025-01-01 08:00:00 UTC)));
        let log = OperationLog::new(store.clone(), clock.clone());
        (store, clock, log)
    }

    #[tokio::test]
    async fn finish_records_duration_and_merged_meta() {
        let (store, clock, log) = setup();
        let id = log
            .start("rates.daily", LogScope::default(), json!({"mode": "daily", "days": 31}))
            .await
            .unwrap();

        clock.advance(Duration::from_millis(2500));
        log.finish(
            id,
            OperationStatus::Success,
            None,
            Some(json!({"days": 30, "rows": 12})),
        )
        .await
        .unwrap();

        let entry = store.get_operation_log(id).await.unwrap();
        assert_eq!(entry.status, OperationStatus::Success);
        assert_eq!(entry.duration_ms, Some(2500));
        assert_eq!(entry.meta, json!({"mode": "daily", "days": 30, "rows": 12}));
        assert_eq!(entry.finished_at, Some(datetime!(2025-01-01 08:00:02.5 UTC)));
    }

    #[tokio::test]
    async fn second_finish_is_rejected_and_swallowed_quietly() {
        let (store, _clock, log) = setup();
        let id = log
            .start("declarations.sync", LogScope::company(7), json!({}))
            .await
            .unwrap();
        log.finish(id, OperationStatus::Error, Some("boom".into()), None)
            .await
            .unwrap();

        let second = log.finish(id, OperationStatus::Success, None, None).await;
        assert!(matches!(second, Err(StorageError::AlreadyFinished { .. })));
        log.finish_quietly(Some(id), OperationStatus::Success, None, None)
            .await;

        let entry = store.get_operation_log(id).await.unwrap();
        assert_eq!(entry.status, OperationStatus::Error);
        assert_eq!(entry.details.as_deref(), Some("boom"));
        assert_eq!(entry.company_id, Some(7));
    }

    #[tokio::test]
    async fn blocked_runs_are_recorded_terminal() {
        let (store, _clock, log) = setup();
        log.record_blocked("rates.full", LogScope::default(), json!({"mode": "full"}))
            .await;
        let entries = store.list_operation_logs(Some("rates.full"), 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OperationStatus::Blocked);
        assert_eq!(entries[0].duration_ms, Some(0));
    }

    #[test]
    fn non_object_meta_is_replaced() {
        assert_eq!(merge_meta(json!({"a": 1}), json!([1, 2])), json!([1, 2]));
        assert_eq!(merge_meta(json!(null), json!({"b": 2})), json!({"b": 2}));
    }
}
