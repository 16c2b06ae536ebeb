use std::future::Future;
use std::sync::Arc;

use super::{at_secs, make_job, make_lock, TestResult};
use crate::record::JobCounter;
use crate::{StorageError, SyncStore};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_lock_inserts_exactly_one_wins",
        concurrent_lock_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_increments_are_not_lost",
        concurrent_increments_are_not_lost(factory).await,
    ));

    results
}

// ── Concurrent lock acquisition: exactly one wins ───────────────────────────

/// N tasks race to insert the same scope. Exactly one insert succeeds; the
/// rest must get `Duplicate`.
async fn concurrent_lock_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            match s
                .insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
                .await
            {
                Ok(()) => Ok(true),
                Err(StorageError::Duplicate { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

// ── Concurrent counter increments: none lost ────────────────────────────────

async fn concurrent_increments_are_not_lost<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let job = storage
        .insert_sync_job(&make_job(1))
        .await
        .map_err(|e| format!("insert job: {e}"))?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        let id = job.id;
        handles.push(tokio::spawn(async move {
            s.increment_sync_job(id, JobCounter::CompletedGuids, at_secs(1))
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let stored = storage
        .get_sync_job(job.id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.completed != N as i64 {
        return Err(format!("expected {N} increments, got {}", stored.completed));
    }
    Ok(())
}
