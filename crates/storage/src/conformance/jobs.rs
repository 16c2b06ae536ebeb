use std::future::Future;

use super::{at_secs, make_job, TestResult, DAY};
use crate::record::{JobCounter, JobStatus, JobTransition, NewSyncJobError};
use crate::{StorageError, SyncStore};

pub(super) async fn run_job_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "jobs",
        "new_job_is_processing_with_zero_counters",
        new_job_is_processing_with_zero_counters(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "counters_increment_monotonically",
        counters_increment_monotonically(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "cancel_stamps_cancelled_at",
        cancel_stamps_cancelled_at(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "terminal_job_rejects_transition",
        terminal_job_rejects_transition(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "transition_to_processing_is_rejected",
        transition_to_processing_is_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "error_records_append_and_mark_retried",
        error_records_append_and_mark_retried(factory).await,
    ));
    results.push(TestResult::from_result(
        "jobs",
        "unknown_job_is_not_found",
        unknown_job_is_not_found(factory).await,
    ));

    results
}

fn transition(to: JobStatus, secs: i64) -> JobTransition {
    JobTransition {
        to,
        error_message: None,
        at: at_secs(secs),
    }
}

fn job_error(job_id: i64, chunk: i64, attempt: i64) -> NewSyncJobError {
    NewSyncJobError {
        sync_job_id: job_id,
        chunk_number: chunk,
        date_from: DAY,
        date_to: DAY,
        error_message: "upstream 502".to_string(),
        error_code: "guid_list".to_string(),
        retry_attempts: attempt,
        created_at: at_secs(attempt),
    }
}

async fn new_job_is_processing_with_zero_counters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    let stored = s.get_sync_job(job.id).await.map_err(|e| e.to_string())?;
    if stored.status != JobStatus::Processing {
        return Err(format!("expected processing, got {}", stored.status));
    }
    if stored.total_chunks != 0 || stored.completed_chunks != 0 || stored.completed != 0 {
        return Err(format!("counters not zeroed: {stored:?}"));
    }
    if stored.cancelled_at.is_some() || stored.finished_at.is_some() {
        return Err("new job carries terminal timestamps".to_string());
    }
    Ok(())
}

async fn counters_increment_monotonically<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    s.set_sync_job_totals(job.id, Some(4), None, at_secs(1))
        .await
        .map_err(|e| e.to_string())?;
    s.set_sync_job_totals(job.id, None, Some(10), at_secs(2))
        .await
        .map_err(|e| e.to_string())?;
    for expected in 1..=3 {
        let v = s
            .increment_sync_job(job.id, JobCounter::CompletedChunks, at_secs(3))
            .await
            .map_err(|e| e.to_string())?;
        if v != expected {
            return Err(format!("expected {expected}, got {v}"));
        }
    }
    s.increment_sync_job(job.id, JobCounter::CompletedGuids, at_secs(4))
        .await
        .map_err(|e| e.to_string())?;
    s.increment_sync_job(job.id, JobCounter::FailedChunks, at_secs(4))
        .await
        .map_err(|e| e.to_string())?;
    let stored = s.get_sync_job(job.id).await.map_err(|e| e.to_string())?;
    if stored.total_chunks != 4 || stored.total_guids != 10 {
        return Err(format!("totals not stored: {stored:?}"));
    }
    if stored.completed_chunks != 3 || stored.completed != 1 || stored.failed_chunks != 1 {
        return Err(format!("counters not stored: {stored:?}"));
    }
    Ok(())
}

async fn cancel_stamps_cancelled_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    let cancelled = s
        .transition_sync_job(job.id, &transition(JobStatus::Cancelled, 30))
        .await
        .map_err(|e| e.to_string())?;
    if cancelled.status != JobStatus::Cancelled || cancelled.cancelled_at != Some(at_secs(30)) {
        return Err(format!("cancel not applied: {cancelled:?}"));
    }
    if cancelled.finished_at != Some(at_secs(30)) {
        return Err("finished_at not stamped".to_string());
    }
    Ok(())
}

async fn terminal_job_rejects_transition<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    s.transition_sync_job(job.id, &transition(JobStatus::Completed, 5))
        .await
        .map_err(|e| e.to_string())?;
    match s
        .transition_sync_job(job.id, &transition(JobStatus::Cancelled, 6))
        .await
    {
        Err(StorageError::InvalidTransition { from, to, .. })
            if from == "completed" && to == "cancelled" => {}
        other => return Err(format!("expected InvalidTransition, got {other:?}")),
    }
    let stored = s.get_sync_job(job.id).await.map_err(|e| e.to_string())?;
    if stored.status != JobStatus::Completed || stored.cancelled_at.is_some() {
        return Err("terminal status was overwritten".to_string());
    }
    Ok(())
}

async fn transition_to_processing_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    match s
        .transition_sync_job(job.id, &transition(JobStatus::Processing, 1))
        .await
    {
        Err(StorageError::InvalidTransition { .. }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {other:?}")),
    }
}

async fn error_records_append_and_mark_retried<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let job = s
        .insert_sync_job(&make_job(3))
        .await
        .map_err(|e| e.to_string())?;
    for (chunk, attempt) in [(1, 1), (1, 2), (2, 1)] {
        s.insert_sync_job_error(&job_error(job.id, chunk, attempt))
            .await
            .map_err(|e| e.to_string())?;
    }
    let changed = s
        .mark_sync_job_errors_retried(job.id, 1)
        .await
        .map_err(|e| e.to_string())?;
    if changed != 2 {
        return Err(format!("expected 2 rows marked, got {changed}"));
    }
    let errors = s
        .list_sync_job_errors(job.id)
        .await
        .map_err(|e| e.to_string())?;
    let shape: Vec<(i64, i64, bool)> = errors
        .iter()
        .map(|e| (e.chunk_number, e.retry_attempts, e.is_retried))
        .collect();
    if shape != [(1, 1, true), (1, 2, true), (2, 1, false)] {
        return Err(format!("unexpected error rows {shape:?}"));
    }
    Ok(())
}

async fn unknown_job_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_sync_job(777).await {
        Err(StorageError::NotFound { .. }) => {}
        other => return Err(format!("expected NotFound, got {other:?}")),
    }
    match s
        .increment_sync_job(777, JobCounter::CompletedChunks, at_secs(0))
        .await
    {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound on increment, got {other:?}")),
    }
}
