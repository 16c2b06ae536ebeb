//! Conformance test suite for `SyncStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `SyncStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Locks**: scope uniqueness, expired-row purge, idempotent delete
//! - **Operation log**: started entries, exactly-once finish
//! - **Rates**: `(date, currency_code)` upsert outcomes and idempotence
//! - **Declarations**: keyed save, keyset paging, summary upsert outcomes
//! - **Jobs**: conditional transitions, monotonic counters, error records
//! - **Concurrency**: racing lock acquisitions and counter increments
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use customs_sync_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         SqliteStore::in_memory().await.unwrap()
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod declarations;
mod jobs;
mod lock;
mod oplog;
mod rates;

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;
use time::macros::{date, datetime};
use time::{Date, OffsetDateTime};

use crate::record::{LockRecord, NewDeclaration, NewSyncJob, RateRow};
use crate::SyncStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "lock", "rates", "jobs").
    pub category: String,
    /// Test name (e.g. "live_lock_rejects_second_insert").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SyncStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(lock::run_lock_tests(&factory).await);
    results.extend(oplog::run_oplog_tests(&factory).await);
    results.extend(rates::run_rate_tests(&factory).await);
    results.extend(declarations::run_declaration_tests(&factory).await);
    results.extend(jobs::run_job_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const T0: OffsetDateTime = datetime!(2025-01-01 12:00:00 UTC);

fn at_secs(secs: i64) -> OffsetDateTime {
    T0 + time::Duration::seconds(secs)
}

fn make_lock(scope_key: &str, expires_at: OffsetDateTime) -> LockRecord {
    LockRecord {
        scope_key: scope_key.to_string(),
        operation: "test-operation".to_string(),
        company_id: None,
        user_id: None,
        expires_at,
    }
}

fn rate(code: &str, value: &str) -> RateRow {
    RateRow {
        currency_code: code.to_string(),
        currency_name: format!("{code} name"),
        rate: value.parse::<Decimal>().unwrap_or_default(),
    }
}

fn make_declaration(company_id: i64, guid: &str) -> NewDeclaration {
    NewDeclaration {
        company_id,
        customs_id: guid.to_string(),
        mrn: Some(format!("MRN-{guid}")),
        status: Some("R".to_string()),
        date: Some(date!(2025 - 01 - 01)),
        xml_data: "<ccd_doc/>".to_string(),
    }
}

fn make_job(company_id: i64) -> NewSyncJob {
    NewSyncJob {
        company_id,
        date_from: DAY,
        date_to: date!(2025 - 01 - 31),
        created_at: T0,
    }
}

const DAY: Date = date!(2025 - 01 - 01);
