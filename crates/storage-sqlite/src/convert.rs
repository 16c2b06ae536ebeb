//! Column codecs and row mappers.

use std::str::FromStr;

use customs_sync_storage::{
    DeclarationRecord, DeclarationSummaryRecord, ExchangeRateRecord, JobStatus, LockRecord,
    OperationLogRecord, OperationStatus, StorageError, SyncJobErrorRecord, SyncJobRecord,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub(crate) fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

// ── Scalars ──────────────────────────────────────────────────────────────────

pub(crate) fn ts(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_ts(ms: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| StorageError::Backend(format!("bad timestamp {ms}: {e}")))
}

fn from_opt_ts(ms: Option<i64>) -> Result<Option<OffsetDateTime>, StorageError> {
    ms.map(from_ts).transpose()
}

pub(crate) fn day(d: Date) -> String {
    d.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| d.to_string())
}

pub(crate) fn from_day(s: &str) -> Result<Date, StorageError> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|e| StorageError::Backend(format!("bad date '{s}': {e}")))
}

fn from_opt_day(s: Option<String>) -> Result<Option<Date>, StorageError> {
    s.as_deref().map(from_day).transpose()
}

pub(crate) fn from_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Backend(format!("bad decimal '{s}': {e}")))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(backend)
}

// ── Rows ─────────────────────────────────────────────────────────────────────

pub(crate) fn lock_row(row: &SqliteRow) -> Result<LockRecord, StorageError> {
    Ok(LockRecord {
        scope_key: get(row, "scope_key")?,
        operation: get(row, "operation")?,
        company_id: get(row, "company_id")?,
        user_id: get(row, "user_id")?,
        expires_at: from_ts(get(row, "expires_at")?)?,
    })
}

pub(crate) fn log_row(row: &SqliteRow) -> Result<OperationLogRecord, StorageError> {
    let status: String = get(row, "status")?;
    let meta: String = get(row, "meta")?;
    Ok(OperationLogRecord {
        id: get(row, "id")?,
        operation: get(row, "operation")?,
        status: OperationStatus::from_str(&status).map_err(StorageError::Backend)?,
        company_id: get(row, "company_id")?,
        user_id: get(row, "user_id")?,
        meta: serde_json::from_str(&meta)
            .map_err(|e| StorageError::Backend(format!("bad meta json: {e}")))?,
        details: get(row, "details")?,
        started_at: from_ts(get(row, "started_at")?)?,
        finished_at: from_opt_ts(get(row, "finished_at")?)?,
        duration_ms: get(row, "duration_ms")?,
    })
}

pub(crate) fn rate_row(row: &SqliteRow) -> Result<ExchangeRateRecord, StorageError> {
    let date: String = get(row, "date")?;
    let rate: String = get(row, "rate")?;
    Ok(ExchangeRateRecord {
        date: from_day(&date)?,
        currency_code: get(row, "currency_code")?,
        currency_name: get(row, "currency_name")?,
        rate: from_decimal(&rate)?,
        updated_at: from_ts(get(row, "updated_at")?)?,
    })
}

pub(crate) fn declaration_row(row: &SqliteRow) -> Result<DeclarationRecord, StorageError> {
    Ok(DeclarationRecord {
        id: get(row, "id")?,
        company_id: get(row, "company_id")?,
        customs_id: get(row, "customs_id")?,
        mrn: get(row, "mrn")?,
        status: get(row, "status")?,
        date: from_opt_day(get(row, "date")?)?,
        xml_data: get(row, "xml_data")?,
        created_at: from_ts(get(row, "created_at")?)?,
    })
}

pub(crate) fn summary_row(row: &SqliteRow) -> Result<DeclarationSummaryRecord, StorageError> {
    let customs_value: Option<String> = get(row, "customs_value")?;
    let hs_codes: String = get(row, "hs_codes")?;
    Ok(DeclarationSummaryRecord {
        declaration_id: get(row, "declaration_id")?,
        representative_name: get(row, "representative_name")?,
        carrier_name: get(row, "carrier_name")?,
        bank_name: get(row, "bank_name")?,
        customs_value: customs_value.as_deref().map(from_decimal).transpose()?,
        hs_codes: serde_json::from_str(&hs_codes)
            .map_err(|e| StorageError::Backend(format!("bad hs_codes json: {e}")))?,
        goods_count: get(row, "goods_count")?,
        updated_at: from_ts(get(row, "updated_at")?)?,
    })
}

pub(crate) fn job_row(row: &SqliteRow) -> Result<SyncJobRecord, StorageError> {
    let status: String = get(row, "status")?;
    let date_from: String = get(row, "date_from")?;
    let date_to: String = get(row, "date_to")?;
    Ok(SyncJobRecord {
        id: get(row, "id")?,
        company_id: get(row, "company_id")?,
        status: JobStatus::from_str(&status).map_err(StorageError::Backend)?,
        date_from: from_day(&date_from)?,
        date_to: from_day(&date_to)?,
        total_chunks: get(row, "total_chunks")?,
        completed_chunks: get(row, "completed_chunks")?,
        failed_chunks: get(row, "failed_chunks")?,
        total_guids: get(row, "total_guids")?,
        completed: get(row, "completed")?,
        error_message: get(row, "error_message")?,
        cancelled_at: from_opt_ts(get(row, "cancelled_at")?)?,
        created_at: from_ts(get(row, "created_at")?)?,
        updated_at: from_ts(get(row, "updated_at")?)?,
        finished_at: from_opt_ts(get(row, "finished_at")?)?,
    })
}

pub(crate) fn job_error_row(row: &SqliteRow) -> Result<SyncJobErrorRecord, StorageError> {
    let date_from: String = get(row, "date_from")?;
    let date_to: String = get(row, "date_to")?;
    Ok(SyncJobErrorRecord {
        id: get(row, "id")?,
        sync_job_id: get(row, "sync_job_id")?,
        chunk_number: get(row, "chunk_number")?,
        date_from: from_day(&date_from)?,
        date_to: from_day(&date_to)?,
        error_message: get(row, "error_message")?,
        error_code: get(row, "error_code")?,
        retry_attempts: get(row, "retry_attempts")?,
        is_retried: get(row, "is_retried")?,
        created_at: from_ts(get(row, "created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn timestamps_round_trip_at_millisecond_precision() {
        let t = datetime!(2025-03-04 05:06:07.123 UTC);
        assert_eq!(from_ts(ts(t)).unwrap(), t);
    }

    #[test]
    fn days_are_zero_padded_and_sortable() {
        assert_eq!(day(date!(2023 - 01 - 09)), "2023-01-09");
        assert!(day(date!(2023 - 01 - 09)) < day(date!(2023 - 01 - 10)));
        assert_eq!(from_day("2023-01-09").unwrap(), date!(2023 - 01 - 09));
    }

    #[test]
    fn bad_decimal_is_a_backend_error() {
        assert!(matches!(
            from_decimal("abc"),
            Err(StorageError::Backend(_))
        ));
    }
}
