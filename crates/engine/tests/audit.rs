mod common;

use std::str::FromStr;

use common::{clock, rate, store, FakeRateSource, NOW};
use customs_sync_engine::{AuditEvent, AuditSummary, EngineError, RateAudit};
use customs_sync_storage::SyncStore;
use rust_decimal::Decimal;
use time::macros::date;
use tokio::sync::mpsc;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn collect(
    audit: &RateAudit,
    from: time::Date,
    to: time::Date,
    repair: bool,
) -> (AuditSummary, Vec<AuditEvent>) {
    let (tx, mut rx) = mpsc::channel(1024);
    let summary = audit.run(from, to, repair, tx).await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (summary, events)
}

#[tokio::test]
async fn reports_changed_and_missing_currencies() {
    let store = store();
    let day = date!(2025 - 03 - 01);
    store
        .upsert_exchange_rates(day, &[rate("USD", "41.0"), rate("GBP", "52.0")], NOW)
        .await
        .unwrap();
    let source = FakeRateSource::with_days([(
        day,
        vec![rate("USD", "41.5"), rate("GBP", "52.0"), rate("EUR", "43.0")],
    )]);
    let audit = RateAudit::new(store.clone(), source, clock());

    let (summary, events) = collect(&audit, day, day, false).await;
    assert_eq!(
        summary,
        AuditSummary {
            days: 1,
            mismatches: 2,
            repaired: 0,
            errors: 0
        }
    );

    assert_eq!(
        events.first(),
        Some(&AuditEvent::Start {
            from: day,
            to: day,
            days: 1
        })
    );
    assert!(events.contains(&AuditEvent::Mismatch {
        date: day,
        currency: "USD".to_string(),
        stored: Some(dec("41.0")),
        source: dec("41.5"),
    }));
    assert!(events.contains(&AuditEvent::Mismatch {
        date: day,
        currency: "EUR".to_string(),
        stored: None,
        source: dec("43.0"),
    }));
    assert_eq!(
        events.last(),
        Some(&AuditEvent::Done {
            days: 1,
            mismatches: 2,
            repaired: 0
        })
    );

    // Without repair the store is untouched.
    assert_eq!(store.count_exchange_rates(day).await.unwrap(), 2);
}

#[tokio::test]
async fn repair_rewrites_mismatching_days() {
    let store = store();
    let day = date!(2025 - 03 - 01);
    store
        .upsert_exchange_rates(day, &[rate("USD", "41.0")], NOW)
        .await
        .unwrap();
    let source = FakeRateSource::with_days([(day, vec![rate("USD", "41.5"), rate("EUR", "43.0")])]);
    let audit = RateAudit::new(store.clone(), source, clock());

    let (summary, _) = collect(&audit, day, day, true).await;
    assert_eq!(summary.mismatches, 2);
    assert_eq!(summary.repaired, 2);

    let rows = store.list_exchange_rates(day).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.currency_code == "USD" && r.rate == dec("41.5")));

    let (again, _) = collect(&audit, day, day, true).await;
    assert_eq!(again.mismatches, 0);
    assert_eq!(again.repaired, 0);
}

#[tokio::test]
async fn days_without_source_data_are_error_events() {
    let store = store();
    let source = FakeRateSource::with_days([(date!(2025 - 03 - 01), vec![rate("USD", "41.0")])]);
    source.fail_on(date!(2025 - 03 - 03));
    let audit = RateAudit::new(store, source, clock());

    let (summary, events) =
        collect(&audit, date!(2025 - 03 - 03), date!(2025 - 03 - 01), false).await;
    assert_eq!(summary.days, 3);
    // 03-01 is missing from the store, 03-02 has no source data, 03-03 fails.
    assert_eq!(summary.mismatches, 1);
    assert_eq!(summary.errors, 2);

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::Error { date, message } => Some((*date, message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].0, date!(2025 - 03 - 02));
    assert_eq!(errors[0].1, "no data from source");
    assert_eq!(errors[1].0, date!(2025 - 03 - 03));

    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::Progress { done, total, .. } => Some((*done, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn long_ranges_cover_every_day_across_chunks() {
    let audit = RateAudit::new(store(), std::sync::Arc::new(FakeRateSource::default()), clock());
    let (summary, _) = collect(&audit, date!(2024 - 01 - 01), date!(2024 - 03 - 31), false).await;
    assert_eq!(summary.days, 91);
    assert_eq!(summary.errors, 91);
}

#[tokio::test]
async fn closed_receiver_cancels_the_audit() {
    let source = FakeRateSource::with_days([(date!(2025 - 03 - 01), vec![rate("USD", "41.0")])]);
    let audit = RateAudit::new(store(), source.clone(), clock());
    let (tx, rx) = mpsc::channel(8);
    drop(rx);

    let err = audit
        .run(date!(2025 - 03 - 01), date!(2025 - 03 - 05), false, tx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(source.calls().is_empty());
}

#[test]
fn events_serialize_with_a_type_tag() {
    let event = AuditEvent::Mismatch {
        date: date!(2025 - 03 - 01),
        currency: "USD".to_string(),
        stored: None,
        source: dec("41.5"),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "mismatch");
    assert_eq!(value["currency"], "USD");
    assert!(value["stored"].is_null());
    assert_eq!(value["source"], "41.5");
}
