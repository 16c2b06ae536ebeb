use std::future::Future;

use super::{at_secs, make_declaration, TestResult};
use crate::record::{DeclarationSummaryRecord, UpsertOutcome};
use crate::{StorageError, SyncStore};

pub(super) async fn run_declaration_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "declarations",
        "save_is_keyed_by_company_and_guid",
        save_is_keyed_by_company_and_guid(factory).await,
    ));
    results.push(TestResult::from_result(
        "declarations",
        "get_unknown_declaration_is_not_found",
        get_unknown_declaration_is_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "declarations",
        "keyset_pages_cover_every_row_once",
        keyset_pages_cover_every_row_once(factory).await,
    ));
    results.push(TestResult::from_result(
        "declarations",
        "summary_upsert_outcomes",
        summary_upsert_outcomes(factory).await,
    ));
    results.push(TestResult::from_result(
        "declarations",
        "stats_are_per_company",
        stats_are_per_company(factory).await,
    ));

    results
}

fn summary(declaration_id: i64, bank: Option<&str>, secs: i64) -> DeclarationSummaryRecord {
    DeclarationSummaryRecord {
        declaration_id,
        representative_name: Some("Broker LLC".to_string()),
        carrier_name: None,
        bank_name: bank.map(str::to_string),
        customs_value: Some("1250.50".parse().unwrap_or_default()),
        hs_codes: vec!["8471300000".to_string(), "8504403000".to_string()],
        goods_count: 2,
        updated_at: at_secs(secs),
    }
}

async fn save_is_keyed_by_company_and_guid<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let first = s
        .save_declaration(&make_declaration(1, "guid-a"), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    if !first.inserted {
        return Err("first save not reported as inserted".to_string());
    }
    let mut changed = make_declaration(1, "guid-a");
    changed.status = Some("X".to_string());
    let again = s
        .save_declaration(&changed, at_secs(1))
        .await
        .map_err(|e| e.to_string())?;
    if again.inserted || again.id != first.id {
        return Err(format!("re-save created a new row: {again:?}"));
    }
    let stored = s
        .get_declaration(first.id)
        .await
        .map_err(|e| e.to_string())?;
    if stored.status.as_deref() != Some("R") {
        return Err("stored declaration was modified by re-save".to_string());
    }
    let other_company = s
        .save_declaration(&make_declaration(2, "guid-a"), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    if !other_company.inserted || other_company.id == first.id {
        return Err("same GUID under another company must be a new row".to_string());
    }
    if other_company.id <= first.id {
        return Err("ids must be strictly increasing".to_string());
    }
    Ok(())
}

async fn get_unknown_declaration_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_declaration(424242).await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

/// 7 rows, pages of 3: [3, 3, 1], each id exactly once, ascending.
async fn keyset_pages_cover_every_row_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut expected = Vec::new();
    for i in 0..7 {
        let saved = s
            .save_declaration(&make_declaration(1, &format!("guid-{i}")), at_secs(0))
            .await
            .map_err(|e| e.to_string())?;
        expected.push(saved.id);
    }

    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    let mut cursor = None;
    loop {
        let page = s
            .list_declarations_after(cursor, 3)
            .await
            .map_err(|e| e.to_string())?;
        sizes.push(page.len());
        seen.extend(page.iter().map(|d| d.id));
        if page.len() < 3 {
            break;
        }
        cursor = page.last().map(|d| d.id);
    }
    if seen != expected {
        return Err(format!("expected {expected:?}, saw {seen:?}"));
    }
    if sizes != [3, 3, 1] {
        return Err(format!("unexpected page sizes {sizes:?}"));
    }

    let replay = s
        .list_declarations_after(Some(expected[1]), 100)
        .await
        .map_err(|e| e.to_string())?;
    if replay.first().map(|d| d.id) != Some(expected[2]) {
        return Err("an older cursor must replay from the next id".to_string());
    }
    Ok(())
}

async fn summary_upsert_outcomes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let saved = s
        .save_declaration(&make_declaration(1, "guid-s"), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;

    let first = s
        .upsert_declaration_summary(&summary(saved.id, Some("Bank A"), 0))
        .await
        .map_err(|e| e.to_string())?;
    if first != UpsertOutcome::Inserted {
        return Err(format!("expected Inserted, got {first:?}"));
    }
    let same = s
        .upsert_declaration_summary(&summary(saved.id, Some("Bank A"), 10))
        .await
        .map_err(|e| e.to_string())?;
    if same != UpsertOutcome::Unchanged {
        return Err(format!("expected Unchanged, got {same:?}"));
    }
    let stored = s
        .get_declaration_summary(saved.id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("summary missing")?;
    if stored.updated_at != at_secs(0) {
        return Err("unchanged upsert moved updated_at".to_string());
    }
    if stored.hs_codes.len() != 2 || stored.customs_value.map(|v| v.to_string()).as_deref() != Some("1250.50") {
        return Err(format!("summary fields not round-tripped: {stored:?}"));
    }
    let changed = s
        .upsert_declaration_summary(&summary(saved.id, None, 20))
        .await
        .map_err(|e| e.to_string())?;
    if changed != UpsertOutcome::Updated {
        return Err(format!("expected Updated, got {changed:?}"));
    }
    let stored = s
        .get_declaration_summary(saved.id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("summary missing")?;
    if stored.bank_name.is_some() || stored.updated_at != at_secs(20) {
        return Err(format!("update not applied: {stored:?}"));
    }
    Ok(())
}

async fn stats_are_per_company<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = s
        .save_declaration(&make_declaration(1, "a"), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    let mut cleared = make_declaration(1, "b");
    cleared.status = Some("X".to_string());
    s.save_declaration(&cleared, at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    s.save_declaration(&make_declaration(2, "c"), at_secs(0))
        .await
        .map_err(|e| e.to_string())?;
    s.upsert_declaration_summary(&summary(a.id, None, 0))
        .await
        .map_err(|e| e.to_string())?;

    let stats = s.declaration_stats(1).await.map_err(|e| e.to_string())?;
    if stats.total != 2 || stats.with_summary != 1 {
        return Err(format!("unexpected totals {stats:?}"));
    }
    if stats.by_status.get("R") != Some(&1) || stats.by_status.get("X") != Some(&1) {
        return Err(format!("unexpected status breakdown {stats:?}"));
    }
    Ok(())
}
