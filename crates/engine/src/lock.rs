//! TTL mutual exclusion over a named scope.
//!
//! The lock is a row in `operation_locks` keyed by `scope_key`; the store's
//! uniqueness constraint is the only correctness mechanism. Acquisition is a
//! single attempt: a live holder yields [`LockOutcome::Locked`], never a wait.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use customs_sync_storage::{LockRecord, StorageError, SyncStore};

use crate::clock::Clock;

/// Scope for a full exchange-rate backfill.
pub const SCOPE_RATES_FULL: &str = "SYNC:full";
/// Scope for the daily exchange-rate gap-fill.
pub const SCOPE_RATES_DAILY: &str = "SYNC:daily";
/// Scope for the summary backfill driver.
pub const SCOPE_SUMMARY_BACKFILL: &str = "BACKFILL:summaries";

/// Per-company declaration sync scope.
pub fn declarations_scope(company_id: i64) -> String {
    format!("DECLARATIONS:{company_id}")
}

/// What to lock, for how long, and on whose behalf.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub scope_key: String,
    pub operation: String,
    pub ttl: Duration,
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl LockRequest {
    pub fn new(scope_key: impl Into<String>, operation: impl Into<String>, ttl: Duration) -> Self {
        Self {
            scope_key: scope_key.into(),
            operation: operation.into(),
            ttl,
            company_id: None,
            user_id: None,
        }
    }

    pub fn company(mut self, company_id: i64) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// A live lock already holds the scope.
    Locked,
}

/// Result of running a body under a lock.
#[derive(Debug)]
pub enum Scoped<T> {
    Ran(T),
    Locked,
}

pub struct OperationLock {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
}

impl OperationLock {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Try once to take the scope. An expired row for the same scope is
    /// purged in the same store transaction as the insert.
    pub async fn acquire(&self, request: &LockRequest) -> Result<LockOutcome, StorageError> {
        let now = self.clock.now();
        let record = LockRecord {
            scope_key: request.scope_key.clone(),
            operation: request.operation.clone(),
            company_id: request.company_id,
            user_id: request.user_id,
            expires_at: now + request.ttl,
        };

        match self.store.insert_lock(&record, now).await {
            Ok(()) => {
                tracing::debug!(scope = %request.scope_key, ttl_ms = request.ttl.as_millis() as u64, "lock acquired");
                Ok(LockOutcome::Acquired)
            }
            Err(StorageError::Duplicate { .. }) => {
                tracing::info!(scope = %request.scope_key, "scope is locked");
                Ok(LockOutcome::Locked)
            }
            Err(e) => Err(e),
        }
    }

    /// Unconditional delete. Releasing a scope nobody holds is a no-op.
    pub async fn release(&self, scope_key: &str) -> Result<(), StorageError> {
        let existed = self.store.delete_lock(scope_key).await?;
        tracing::debug!(scope = %scope_key, existed, "lock released");
        Ok(())
    }

    /// Run `body` while holding the scope, releasing it afterwards whatever
    /// the body returned. `body` is not polled when the scope is locked.
    pub async fn scoped<Fut, T>(
        &self,
        request: &LockRequest,
        body: Fut,
    ) -> Result<Scoped<T>, StorageError>
    where
        Fut: Future<Output = T>,
    {
        if self.acquire(request).await? == LockOutcome::Locked {
            return Ok(Scoped::Locked);
        }
        let out = body.await;
        if let Err(e) = self.release(&request.scope_key).await {
            // The TTL reclaims the scope; surface the failure in the logs only.
            tracing::error!(scope = %request.scope_key, error = %e, "failed to release lock");
        }
        Ok(Scoped::Ran(out))
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
