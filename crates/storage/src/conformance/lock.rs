use std::future::Future;

use super::{at_secs, make_lock, TestResult};
use crate::{StorageError, SyncStore};

pub(super) async fn run_lock_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "lock",
        "insert_lock_on_free_scope",
        insert_lock_on_free_scope(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "live_lock_rejects_second_insert",
        live_lock_rejects_second_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "expired_lock_is_purged_on_insert",
        expired_lock_is_purged_on_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "lock_expiring_exactly_now_is_expired",
        lock_expiring_exactly_now_is_expired(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "delete_lock_is_idempotent",
        delete_lock_is_idempotent(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "scopes_are_independent",
        scopes_are_independent(factory).await,
    ));

    results
}

async fn insert_lock_on_free_scope<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let stored = s
        .get_lock("SYNC:daily")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("lock row missing after insert")?;
    if stored.expires_at != at_secs(60) {
        return Err(format!("unexpected expires_at {}", stored.expires_at));
    }
    Ok(())
}

/// A second insert while the first row is still live must be `Duplicate`.
async fn live_lock_rejects_second_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    match s
        .insert_lock(&make_lock("SYNC:daily", at_secs(90)), at_secs(30))
        .await
    {
        Err(StorageError::Duplicate { .. }) => {}
        Ok(()) => return Err("second insert on a live scope succeeded".to_string()),
        Err(e) => return Err(format!("expected Duplicate, got: {e}")),
    }
    let stored = s
        .get_lock("SYNC:daily")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("lock row missing")?;
    if stored.expires_at != at_secs(60) {
        return Err("losing insert overwrote the live lock".to_string());
    }
    Ok(())
}

/// An expired row must not block; the new row replaces it.
async fn expired_lock_is_purged_on_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_lock(&make_lock("SYNC:full", at_secs(10)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_lock(&make_lock("SYNC:full", at_secs(100)), at_secs(11))
        .await
        .map_err(|e| format!("insert over expired lock: {e}"))?;
    let stored = s
        .get_lock("SYNC:full")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("lock row missing")?;
    if stored.expires_at != at_secs(100) {
        return Err("stale row was not replaced".to_string());
    }
    Ok(())
}

async fn lock_expiring_exactly_now_is_expired<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_lock(&make_lock("SYNC:daily", at_secs(1)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_lock(&make_lock("SYNC:daily", at_secs(2)), at_secs(1))
        .await
        .map_err(|e| format!("lock at its expiry instant still blocked: {e}"))
}

async fn delete_lock_is_idempotent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let existed = s.delete_lock("nothing").await.map_err(|e| e.to_string())?;
    if existed {
        return Err("delete on empty scope reported a row".to_string());
    }
    s.insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    if !s.delete_lock("SYNC:daily").await.map_err(|e| e.to_string())? {
        return Err("delete did not report the existing row".to_string());
    }
    if s.delete_lock("SYNC:daily").await.map_err(|e| e.to_string())? {
        return Err("second delete reported a row".to_string());
    }
    s.insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| format!("insert after release: {e}"))
}

async fn scopes_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_lock(&make_lock("SYNC:daily", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_lock(&make_lock("SYNC:full", at_secs(60)), at_secs(0))
        .await
        .map_err(|e| format!("independent scope blocked: {e}"))
}
