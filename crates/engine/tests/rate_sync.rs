mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{clock, rate, store, FakeRateSource, NOW};
use customs_sync_engine::lock::SCOPE_RATES_DAILY;
use customs_sync_engine::{
    ExchangeRateSyncer, LockRequest, OperationLock, RateProgress, RateSyncConfig, RateSyncMode,
    RateSyncReport, SyncOutcome,
};
use customs_sync_storage::{OperationStatus, SyncStore};
use time::macros::date;

fn config() -> RateSyncConfig {
    RateSyncConfig {
        backfill_years: 1,
        gap_fill_days: 30,
        request_delay: Duration::ZERO,
        lock_ttl: Duration::from_secs(3600),
    }
}

fn completed(outcome: SyncOutcome<RateSyncReport>) -> RateSyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Locked => panic!("run was locked"),
    }
}

#[tokio::test]
async fn full_backfill_rerun_keeps_values_and_refreshes_updated_at() {
    let store = store();
    let clock = clock();
    let source = FakeRateSource::with_days([
        (date!(2024 - 12 - 02), vec![rate("USD", "41.1"), rate("EUR", "43.5")]),
        (date!(2025 - 03 - 07), vec![rate("USD", "41.6")]),
    ]);
    let syncer = ExchangeRateSyncer::new(store.clone(), source.clone(), clock.clone(), config());

    let first = completed(syncer.run(RateSyncMode::Full, &|_| {}).await.unwrap());
    let range = syncer.range_for(RateSyncMode::Full);
    assert_eq!(range.start, date!(2024 - 03 - 10));
    assert_eq!(range.end, date!(2025 - 03 - 10));
    assert_eq!(first.days_total, range.day_count() as u64);
    assert_eq!(first.days_processed, 2);
    assert_eq!(first.days_missed, first.days_total - 2);
    assert_eq!(first.rows_synced, 3);
    assert_eq!(source.calls().len() as u64, first.days_total);

    clock.advance(Duration::from_secs(3600));
    let second = completed(syncer.run(RateSyncMode::Full, &|_| {}).await.unwrap());
    assert_eq!(second.rows_synced, 3);

    let rows = store.list_exchange_rates(date!(2024 - 12 - 02)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].currency_code, "EUR");
    assert_eq!(rows[0].rate.to_string(), "43.5");
    assert_eq!(rows[1].currency_name, "USD name");
    assert!(rows
        .iter()
        .all(|r| r.updated_at == NOW + Duration::from_secs(3600)));
}

#[tokio::test]
async fn changed_source_value_overwrites_in_place() {
    let store = store();
    let source = FakeRateSource::with_days([(date!(2025 - 03 - 09), vec![rate("USD", "41.0")])]);
    let syncer = ExchangeRateSyncer::new(store.clone(), source.clone(), clock(), config());
    syncer.run(RateSyncMode::Full, &|_| {}).await.unwrap();

    source.set(date!(2025 - 03 - 09), vec![rate("USD", "41.25")]);
    syncer.run(RateSyncMode::Full, &|_| {}).await.unwrap();

    let rows = store.list_exchange_rates(date!(2025 - 03 - 09)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rate.to_string(), "41.25");
}

#[tokio::test]
async fn gap_fill_never_refetches_a_day_with_any_row() {
    let store = store();
    let partial_day = date!(2025 - 03 - 01);
    let empty_day = date!(2025 - 03 - 02);

    // A previous run stored only one of the day's currencies.
    store
        .upsert_exchange_rates(partial_day, &[rate("USD", "41.3")], NOW)
        .await
        .unwrap();

    let source = FakeRateSource::with_days([
        (partial_day, vec![rate("USD", "41.3"), rate("EUR", "43.9")]),
        (empty_day, vec![rate("USD", "41.4")]),
    ]);
    let syncer = ExchangeRateSyncer::new(store.clone(), source.clone(), clock(), config());
    let report = completed(syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap());

    assert_eq!(report.days_total, 31);
    assert_eq!(report.days_skipped, 1);
    assert_eq!(report.days_processed, 1);
    assert!(!source.calls().contains(&partial_day));
    assert!(source.calls().contains(&empty_day));

    // Known limitation: the partial day stays partial.
    assert_eq!(store.count_exchange_rates(partial_day).await.unwrap(), 1);
    assert_eq!(store.count_exchange_rates(empty_day).await.unwrap(), 1);
}

#[tokio::test]
async fn unreachable_day_is_a_miss_and_the_loop_continues() {
    let store = store();
    let source = FakeRateSource::with_days([
        (date!(2025 - 02 - 20), vec![rate("USD", "41.0")]),
        (date!(2025 - 02 - 21), vec![rate("USD", "41.1")]),
    ]);
    source.fail_on(date!(2025 - 02 - 20));
    let syncer = ExchangeRateSyncer::new(store.clone(), source.clone(), clock(), config());

    let report = completed(syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap());
    assert_eq!(report.days_failed, 0);
    assert_eq!(report.days_processed, 1);
    assert_eq!(report.days_missed, 30);
    assert_eq!(
        report.days_processed + report.days_skipped + report.days_missed + report.days_failed,
        report.days_total
    );
    assert_eq!(source.calls().len(), 31);
    assert_eq!(store.count_exchange_rates(date!(2025 - 02 - 20)).await.unwrap(), 0);

    let logs = store.list_operation_logs(Some("rates.daily"), 1).await.unwrap();
    assert_eq!(logs[0].status, OperationStatus::Success);
    assert_eq!(logs[0].details, None);
    assert_eq!(logs[0].meta["report"]["daysMissed"], 30);
    assert_eq!(logs[0].meta["mode"], "daily");
}

#[tokio::test]
async fn source_outage_marks_every_day_missed_not_failed() {
    let store = store();
    let source = FakeRateSource::with_days([(date!(2025 - 03 - 09), vec![rate("USD", "41.0")])]);
    let syncer = ExchangeRateSyncer::new(
        store.clone(),
        source.clone(),
        clock(),
        RateSyncConfig {
            gap_fill_days: 1,
            ..config()
        },
    );
    source.fail_on(date!(2025 - 03 - 09));
    source.fail_on(date!(2025 - 03 - 10));

    let report = completed(syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap());
    assert_eq!(report.days_total, 2);
    assert_eq!(report.days_missed, 2);
    assert_eq!(report.days_failed, 0);
    assert_eq!(report.rows_synced, 0);

    let logs = store.list_operation_logs(Some("rates.daily"), 1).await.unwrap();
    assert_eq!(logs[0].status, OperationStatus::Success);
}

#[tokio::test]
async fn unreadable_source_body_is_a_miss() {
    let store = store();
    let source = FakeRateSource::with_days([
        (date!(2025 - 03 - 09), vec![rate("USD", "41.0")]),
        (date!(2025 - 03 - 10), vec![rate("USD", "41.2")]),
    ]);
    source.malformed_on(date!(2025 - 03 - 09));
    let syncer = ExchangeRateSyncer::new(
        store.clone(),
        source.clone(),
        clock(),
        RateSyncConfig {
            gap_fill_days: 1,
            ..config()
        },
    );

    let report = completed(syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap());
    assert_eq!(report.days_missed, 1);
    assert_eq!(report.days_processed, 1);
    assert_eq!(report.days_failed, 0);
    assert_eq!(store.count_exchange_rates(date!(2025 - 03 - 09)).await.unwrap(), 0);
    assert_eq!(store.count_exchange_rates(date!(2025 - 03 - 10)).await.unwrap(), 1);
}

#[tokio::test]
async fn progress_is_reported_after_every_day_in_order() {
    let source = Arc::new(FakeRateSource::default());
    let syncer = ExchangeRateSyncer::new(store(), source, clock(), config());
    let seen: Mutex<Vec<RateProgress>> = Mutex::new(Vec::new());

    syncer
        .run(RateSyncMode::Daily, &|p| seen.lock().unwrap().push(*p))
        .await
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 31);
    assert_eq!(seen[0].date, date!(2025 - 02 - 08));
    assert_eq!(seen[30].date, date!(2025 - 03 - 10));
    for (i, p) in seen.iter().enumerate() {
        assert_eq!(p.done, i as u64 + 1);
        assert_eq!(p.total, 31);
    }
    assert!(seen.windows(2).all(|w| w[0].date < w[1].date));
}

#[tokio::test]
async fn held_scope_returns_locked_and_logs_blocked() {
    let store = store();
    let clock = clock();
    let source = Arc::new(FakeRateSource::default());
    let syncer = ExchangeRateSyncer::new(store.clone(), source.clone(), clock.clone(), config());

    let lock = OperationLock::new(store.clone(), clock.clone());
    lock.acquire(&LockRequest::new(
        SCOPE_RATES_DAILY,
        "rates.daily",
        Duration::from_secs(60),
    ))
    .await
    .unwrap();

    let outcome = syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap();
    assert!(outcome.is_locked());
    assert!(source.calls().is_empty());

    let logs = store.list_operation_logs(Some("rates.daily"), 5).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, OperationStatus::Blocked);

    // The full-backfill scope is independent.
    let full = syncer.run(RateSyncMode::Full, &|_| {}).await.unwrap();
    assert!(!full.is_locked());

    // Once the holder's TTL passes, the daily run goes through.
    clock.advance(Duration::from_secs(60));
    let retry = syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap();
    assert!(!retry.is_locked());
}

#[tokio::test]
async fn lock_is_released_after_a_run() {
    let store = store();
    let syncer = ExchangeRateSyncer::new(store.clone(), Arc::new(FakeRateSource::default()), clock(), config());
    syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap();
    assert!(store.get_lock(SCOPE_RATES_DAILY).await.unwrap().is_none());
    assert!(!syncer.run(RateSyncMode::Daily, &|_| {}).await.unwrap().is_locked());
}

#[test]
fn modes_parse_from_wire_names() {
    assert_eq!("full".parse::<RateSyncMode>().unwrap(), RateSyncMode::Full);
    assert_eq!(" Daily ".parse::<RateSyncMode>().unwrap(), RateSyncMode::Daily);
    assert!("weekly".parse::<RateSyncMode>().is_err());
    assert_eq!(RateSyncMode::Full.operation(), "rates.full");
}
