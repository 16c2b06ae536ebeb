use std::future::Future;

use super::{at_secs, TestResult};
use crate::record::{NewOperationLog, OperationLogFinish, OperationStatus};
use crate::{StorageError, SyncStore};

pub(super) async fn run_oplog_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "oplog",
        "insert_creates_started_entry",
        insert_creates_started_entry(factory).await,
    ));
    results.push(TestResult::from_result(
        "oplog",
        "finish_writes_terminal_fields",
        finish_writes_terminal_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "oplog",
        "second_finish_is_rejected",
        second_finish_is_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "oplog",
        "finish_unknown_id_is_not_found",
        finish_unknown_id_is_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "oplog",
        "list_is_newest_first_and_filtered",
        list_is_newest_first_and_filtered(factory).await,
    ));

    results
}

fn entry(operation: &str) -> NewOperationLog {
    NewOperationLog {
        operation: operation.to_string(),
        company_id: Some(7),
        user_id: None,
        meta: serde_json::json!({"mode": "daily"}),
        started_at: at_secs(0),
    }
}

fn finish(status: OperationStatus) -> OperationLogFinish {
    OperationLogFinish {
        status,
        details: Some("done".to_string()),
        meta: Some(serde_json::json!({"mode": "daily", "rows": 3})),
        finished_at: at_secs(2),
        duration_ms: 2000,
    }
}

async fn insert_creates_started_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = s
        .insert_operation_log(&entry("rates.daily"))
        .await
        .map_err(|e| e.to_string())?;
    let rec = s.get_operation_log(id).await.map_err(|e| e.to_string())?;
    if rec.status != OperationStatus::Started {
        return Err(format!("expected started, got {}", rec.status));
    }
    if rec.finished_at.is_some() || rec.duration_ms.is_some() {
        return Err("started entry already has terminal fields".to_string());
    }
    if rec.company_id != Some(7) || rec.meta["mode"] != "daily" {
        return Err(format!("fields not stored: {rec:?}"));
    }
    Ok(())
}

async fn finish_writes_terminal_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = s
        .insert_operation_log(&entry("rates.daily"))
        .await
        .map_err(|e| e.to_string())?;
    s.finish_operation_log(id, &finish(OperationStatus::Success))
        .await
        .map_err(|e| e.to_string())?;
    let rec = s.get_operation_log(id).await.map_err(|e| e.to_string())?;
    if rec.status != OperationStatus::Success {
        return Err(format!("expected success, got {}", rec.status));
    }
    if rec.duration_ms != Some(2000) || rec.finished_at != Some(at_secs(2)) {
        return Err(format!("terminal timing not stored: {rec:?}"));
    }
    if rec.meta["rows"] != 3 || rec.details.as_deref() != Some("done") {
        return Err(format!("terminal meta/details not stored: {rec:?}"));
    }
    Ok(())
}

async fn second_finish_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = s
        .insert_operation_log(&entry("rates.full"))
        .await
        .map_err(|e| e.to_string())?;
    s.finish_operation_log(id, &finish(OperationStatus::Error))
        .await
        .map_err(|e| e.to_string())?;
    match s
        .finish_operation_log(id, &finish(OperationStatus::Success))
        .await
    {
        Err(StorageError::AlreadyFinished { log_id }) if log_id == id => {}
        other => return Err(format!("expected AlreadyFinished, got {other:?}")),
    }
    let rec = s.get_operation_log(id).await.map_err(|e| e.to_string())?;
    if rec.status != OperationStatus::Error {
        return Err("second finish overwrote the terminal status".to_string());
    }
    Ok(())
}

async fn finish_unknown_id_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s
        .finish_operation_log(9999, &finish(OperationStatus::Success))
        .await
    {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn list_is_newest_first_and_filtered<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = s
        .insert_operation_log(&entry("rates.daily"))
        .await
        .map_err(|e| e.to_string())?;
    let _ = s
        .insert_operation_log(&entry("rates.full"))
        .await
        .map_err(|e| e.to_string())?;
    let c = s
        .insert_operation_log(&entry("rates.daily"))
        .await
        .map_err(|e| e.to_string())?;

    let daily = s
        .list_operation_logs(Some("rates.daily"), 10)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<i64> = daily.iter().map(|r| r.id).collect();
    if ids != vec![c, a] {
        return Err(format!("expected [{c}, {a}], got {ids:?}"));
    }
    let all = s
        .list_operation_logs(None, 2)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 2 || all[0].id != c {
        return Err(format!("limit/order not applied: {all:?}"));
    }
    Ok(())
}
