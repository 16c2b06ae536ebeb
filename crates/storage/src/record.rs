use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

// ──────────────────────────────────────────────
// Operation locks
// ──────────────────────────────────────────────

/// A row in `operation_locks`. At most one live row per `scope_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub scope_key: String,
    pub operation: String,
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl LockRecord {
    /// A lock whose `expires_at` is at or before `now` no longer protects anything.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

// ──────────────────────────────────────────────
// Operation log
// ──────────────────────────────────────────────

/// Status of an operation log entry. `Started` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Started,
    Success,
    Error,
    Blocked,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Started => "started",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
            OperationStatus::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Started)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(OperationStatus::Started),
            "success" => Ok(OperationStatus::Success),
            "error" => Ok(OperationStatus::Error),
            "blocked" => Ok(OperationStatus::Blocked),
            other => Err(format!("unknown operation status '{other}'")),
        }
    }
}

/// Insert payload for a new `started` log entry.
#[derive(Debug, Clone)]
pub struct NewOperationLog {
    pub operation: String,
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
    pub meta: serde_json::Value,
    pub started_at: OffsetDateTime,
}

/// Terminal update for a log entry. Written exactly once.
#[derive(Debug, Clone)]
pub struct OperationLogFinish {
    pub status: OperationStatus,
    pub details: Option<String>,
    /// Replaces the stored meta when present.
    pub meta: Option<serde_json::Value>,
    pub finished_at: OffsetDateTime,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogRecord {
    pub id: i64,
    pub operation: String,
    pub status: OperationStatus,
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
    pub meta: serde_json::Value,
    pub details: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
}

// ──────────────────────────────────────────────
// Exchange rates
// ──────────────────────────────────────────────

/// One currency line of a day's rate table, as delivered by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRow {
    pub currency_code: String,
    pub currency_name: String,
    pub rate: Decimal,
}

/// A stored exchange rate, unique on `(date, currency_code)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateRecord {
    pub date: Date,
    pub currency_code: String,
    pub currency_name: String,
    pub rate: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Per-row outcome counts of a day's rate upsert.
///
/// `unchanged` rows kept their rate and name; their `updated_at` is still
/// refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateUpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl RateUpsertCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Outcome of a single keyed upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    /// True when the stored row was created or its content changed.
    pub fn is_write(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

// ──────────────────────────────────────────────
// Declarations
// ──────────────────────────────────────────────

/// Insert payload for a declaration fetched from the document source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeclaration {
    pub company_id: i64,
    /// External document GUID.
    pub customs_id: String,
    pub mrn: Option<String>,
    pub status: Option<String>,
    pub date: Option<Date>,
    /// Raw payload: JSON envelope or legacy markup.
    pub xml_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRecord {
    /// Store-assigned, strictly increasing. Used as the keyset cursor.
    pub id: i64,
    pub company_id: i64,
    pub customs_id: String,
    pub mrn: Option<String>,
    pub status: Option<String>,
    pub date: Option<Date>,
    pub xml_data: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of saving a declaration keyed by `(company_id, customs_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedDeclaration {
    pub id: i64,
    /// False when the GUID was already stored for this company.
    pub inserted: bool,
}

/// Typed projection of a declaration's payload. Keyed by `declaration_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSummaryRecord {
    pub declaration_id: i64,
    pub representative_name: Option<String>,
    pub carrier_name: Option<String>,
    pub bank_name: Option<String>,
    pub customs_value: Option<Decimal>,
    pub hs_codes: Vec<String>,
    pub goods_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DeclarationSummaryRecord {
    /// Compare everything except `updated_at`.
    pub fn same_content(&self, other: &DeclarationSummaryRecord) -> bool {
        self.declaration_id == other.declaration_id
            && self.representative_name == other.representative_name
            && self.carrier_name == other.carrier_name
            && self.bank_name == other.bank_name
            && self.customs_value == other.customs_value
            && self.hs_codes == other.hs_codes
            && self.goods_count == other.goods_count
    }
}

/// Aggregated per-company declaration counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationStats {
    pub total: u64,
    pub with_summary: u64,
    pub by_status: BTreeMap<String, u64>,
}

// ──────────────────────────────────────────────
// Sync jobs
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub company_id: i64,
    pub date_from: Date,
    pub date_to: Date,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobRecord {
    pub id: i64,
    pub company_id: i64,
    pub status: JobStatus,
    pub date_from: Date,
    pub date_to: Date,
    /// Phase 1 count.
    pub total_chunks: i64,
    pub completed_chunks: i64,
    pub failed_chunks: i64,
    /// Phase 2 count.
    pub total_guids: i64,
    pub completed: i64,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

/// Monotonic counters on a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCounter {
    CompletedChunks,
    FailedChunks,
    CompletedGuids,
}

impl JobCounter {
    pub fn column(&self) -> &'static str {
        match self {
            JobCounter::CompletedChunks => "completed_chunks",
            JobCounter::FailedChunks => "failed_chunks",
            JobCounter::CompletedGuids => "completed",
        }
    }
}

/// A move out of `processing` into a terminal status.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub to: JobStatus,
    pub error_message: Option<String>,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSyncJobError {
    pub sync_job_id: i64,
    pub chunk_number: i64,
    pub date_from: Date,
    pub date_to: Date,
    pub error_message: String,
    pub error_code: String,
    pub retry_attempts: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobErrorRecord {
    pub id: i64,
    pub sync_job_id: i64,
    pub chunk_number: i64,
    pub date_from: Date,
    pub date_to: Date,
    pub error_message: String,
    pub error_code: String,
    pub retry_attempts: i64,
    pub is_retried: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
