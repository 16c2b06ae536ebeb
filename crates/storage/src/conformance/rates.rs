use std::future::Future;

use time::macros::date;

use super::{at_secs, rate, TestResult, DAY};
use crate::record::RateUpsertCounts;
use crate::SyncStore;

pub(super) async fn run_rate_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "rates",
        "first_upsert_inserts_every_row",
        first_upsert_inserts_every_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "rates",
        "same_upsert_twice_keeps_one_row",
        same_upsert_twice_keeps_one_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "rates",
        "changed_rate_updates_in_place",
        changed_rate_updates_in_place(factory).await,
    ));
    results.push(TestResult::from_result(
        "rates",
        "days_are_independent",
        days_are_independent(factory).await,
    ));
    results.push(TestResult::from_result(
        "rates",
        "list_is_ordered_by_currency",
        list_is_ordered_by_currency(factory).await,
    ));

    results
}

async fn first_upsert_inserts_every_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let counts = s
        .upsert_exchange_rates(DAY, &[rate("USD", "41.1234"), rate("EUR", "44.5")], at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let expected = RateUpsertCounts {
        inserted: 2,
        updated: 0,
        unchanged: 0,
    };
    if counts != expected {
        return Err(format!("expected {expected:?}, got {counts:?}"));
    }
    let n = s.count_exchange_rates(DAY).await.map_err(|e| e.to_string())?;
    if n != 2 {
        return Err(format!("expected 2 stored rows, got {n}"));
    }
    Ok(())
}

/// Upserting the same (date, code, rate) twice yields exactly one row; the
/// second write refreshes `updated_at` but not the values.
async fn same_upsert_twice_keeps_one_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rows = [rate("USD", "41.1234")];
    s.upsert_exchange_rates(DAY, &rows, at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let counts = s
        .upsert_exchange_rates(DAY, &rows, at_secs(5))
        .await
        .map_err(|e| e.to_string())?;
    if counts.unchanged != 1 || counts.inserted != 0 || counts.updated != 0 {
        return Err(format!("second upsert should be unchanged, got {counts:?}"));
    }
    let stored = s.list_exchange_rates(DAY).await.map_err(|e| e.to_string())?;
    if stored.len() != 1 {
        return Err(format!("expected 1 row, got {}", stored.len()));
    }
    if stored[0].rate.to_string() != "41.1234" {
        return Err(format!("rate changed to {}", stored[0].rate));
    }
    if stored[0].updated_at != at_secs(5) {
        return Err("updated_at was not refreshed".to_string());
    }
    Ok(())
}

async fn changed_rate_updates_in_place<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.upsert_exchange_rates(DAY, &[rate("USD", "41.1")], at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let counts = s
        .upsert_exchange_rates(DAY, &[rate("USD", "41.2"), rate("PLN", "10.3")], at_secs(1))
        .await
        .map_err(|e| e.to_string())?;
    if counts.updated != 1 || counts.inserted != 1 {
        return Err(format!("expected 1 updated + 1 inserted, got {counts:?}"));
    }
    let stored = s.list_exchange_rates(DAY).await.map_err(|e| e.to_string())?;
    let usd = stored
        .iter()
        .find(|r| r.currency_code == "USD")
        .ok_or("USD row missing")?;
    if usd.rate.to_string() != "41.2" {
        return Err(format!("expected 41.2, got {}", usd.rate));
    }
    Ok(())
}

async fn days_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.upsert_exchange_rates(DAY, &[rate("USD", "41.1")], at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let other = date!(2025 - 01 - 02);
    let n = s.count_exchange_rates(other).await.map_err(|e| e.to_string())?;
    if n != 0 {
        return Err(format!("row leaked into another day: {n}"));
    }
    let counts = s
        .upsert_exchange_rates(other, &[rate("USD", "41.1")], at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    if counts.inserted != 1 {
        return Err(format!("same code on another day must insert, got {counts:?}"));
    }
    Ok(())
}

async fn list_is_ordered_by_currency<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.upsert_exchange_rates(
        DAY,
        &[rate("USD", "1"), rate("CHF", "2"), rate("EUR", "3")],
        at_secs(0),
    )
    .await
    .map_err(|e| e.to_string())?;
    let codes: Vec<String> = s
        .list_exchange_rates(DAY)
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|r| r.currency_code)
        .collect();
    if codes != ["CHF", "EUR", "USD"] {
        return Err(format!("unexpected order {codes:?}"));
    }
    Ok(())
}
